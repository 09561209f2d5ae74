//! Bidirectional inode ↔ virtual path mapping
//!
//! The kernel addresses entries by 64-bit inode; the adapter works on
//! virtual paths. Inodes are handed out on first sight of a path and stay
//! stable for the life of the mount.

use std::collections::HashMap;

/// Bidirectional mapping between inodes and virtual paths
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    /// Next available inode number (1 is reserved for root)
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.path_to_inode.insert("/".to_string(), Self::ROOT_INODE);
        table.inode_to_path.insert(Self::ROOT_INODE, "/".to_string());
        table
    }

    /// Get or create an inode for a virtual path
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        let normalized = Self::normalize_path(path);
        if let Some(&inode) = self.path_to_inode.get(&normalized) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(normalized.clone(), inode);
        self.inode_to_path.insert(inode, normalized);
        inode
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Leading slash, no trailing slash, `/` for root
    fn normalize_path(path: &str) -> String {
        let path = path.trim();
        if path.is_empty() || path == "/" {
            return "/".to_string();
        }

        let mut normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        normalized
    }

    /// Virtual path of `name` inside directory `parent`
    pub fn child_path(parent: &str, name: &str) -> String {
        let parent = Self::normalize_path(parent);
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    pub fn parent_path(path: &str) -> String {
        let normalized = Self::normalize_path(path);
        match normalized.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => normalized[..pos].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_inode() {
        let mut table = InodeTable::new();
        assert_eq!(table.get_path(InodeTable::ROOT_INODE), Some("/"));
        assert_eq!(table.get_or_create("/"), InodeTable::ROOT_INODE);
        assert_eq!(table.get_or_create(""), InodeTable::ROOT_INODE);
        assert_eq!(table.get_path(InodeTable::ROOT_INODE + 1), None);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let mut table = InodeTable::new();

        let track = table.get_or_create("/album/track.flac.mp3");
        let again = table.get_or_create("album/track.flac.mp3/");
        let notes = table.get_or_create("/notes.txt");

        assert_eq!(track, again);
        assert_ne!(track, notes);
        assert_ne!(track, InodeTable::ROOT_INODE);
        assert_eq!(table.get_path(track), Some("/album/track.flac.mp3"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(InodeTable::normalize_path(""), "/");
        assert_eq!(InodeTable::normalize_path("/"), "/");
        assert_eq!(InodeTable::normalize_path("album"), "/album");
        assert_eq!(InodeTable::normalize_path("/album/"), "/album");
        assert_eq!(InodeTable::normalize_path("/album/a.flac.mp3"), "/album/a.flac.mp3");
    }

    #[test]
    fn test_child_path() {
        assert_eq!(InodeTable::child_path("/", "album"), "/album");
        assert_eq!(InodeTable::child_path("/album", "a.flac.mp3"), "/album/a.flac.mp3");
        assert_eq!(InodeTable::child_path("/album/", "cd1"), "/album/cd1");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(InodeTable::parent_path("/"), "/");
        assert_eq!(InodeTable::parent_path("/album"), "/");
        assert_eq!(InodeTable::parent_path("/album/cd1"), "/album");
        assert_eq!(InodeTable::parent_path("/album/cd1/a.flac.mp3"), "/album/cd1");
    }
}
