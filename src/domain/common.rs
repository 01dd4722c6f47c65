use uuid::Uuid;

/// Identifies entities that expose a stable unique identifier.
pub trait Identifiable {
    fn id(&self) -> Uuid;
}

/// Entities owned by a single user.
pub trait Owned {
    fn owner(&self) -> Uuid;

    fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner() == user_id
    }
}

/// Supplies a presentation-ready label for logs.
pub trait Displayable {
    fn display_label(&self) -> String;
}
