//! Id generation shared by every entity table.

use uuid::Uuid;

/// Generate a fresh random entity id.
///
/// All entity ids are plain UUID v4 strings; nothing in the schema derives
/// meaning from their shape, so we do not bother with typed newtypes per
/// entity kind here.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_unique_and_parses_as_uuid() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
