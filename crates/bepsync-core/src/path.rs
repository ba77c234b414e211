//! Slash-separated folder-relative paths.
//!
//! The folder root is the empty string. Paths never start or end with `/`.

/// The folder root.
pub const ROOT_PATH: &str = "";

/// Path separator used on the wire and in the store.
pub const PATH_SEPARATOR: char = '/';

pub fn is_root(path: &str) -> bool {
    path == ROOT_PATH
}

/// Last path component. Empty for the root.
pub fn file_name(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything before the last component. The parent of a top-level entry,
/// and of the root itself, is the root.
pub fn parent(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[..idx],
        None => ROOT_PATH,
    }
}

/// Join a parent and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if is_root(parent) {
        name.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_nested_path() {
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(parent("a/b/c.txt"), "a/b");
    }

    #[test]
    fn test_top_level_path() {
        assert_eq!(file_name("c.txt"), "c.txt");
        assert_eq!(parent("c.txt"), ROOT_PATH);
    }

    #[test]
    fn test_root() {
        assert!(is_root(""));
        assert_eq!(file_name(ROOT_PATH), "");
        assert_eq!(parent(ROOT_PATH), ROOT_PATH);
    }

    #[test]
    fn test_join() {
        assert_eq!(join(ROOT_PATH, "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }

    proptest! {
        #[test]
        fn join_inverts_split(components in prop::collection::vec("[a-z0-9._-]{1,8}", 1..6)) {
            let path = components.join("/");
            prop_assert_eq!(join(parent(&path), file_name(&path)), path.clone());
        }
    }
}
