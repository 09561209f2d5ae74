//! Virtual ↔ real path mapping
//!
//! Clients of the mount see transcodable sources under a virtual name that
//! carries the output extension as an extra suffix: `track.flac` on the source
//! tree is listed as `track.flac.mp3`. Every other name passes through
//! unchanged in both directions.
//!
//! Matching is ASCII case-insensitive on both the source extension and the
//! virtual suffix, and the original casing of the stem is always preserved so
//! the mapping stays a bijection over transcodable names.

/// One source-extension → virtual-suffix rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMapping {
    /// Extension of the real file, including the dot (`.flac`)
    pub source_extension: &'static str,
    /// Suffix appended to the real name to form the virtual name (`.mp3`)
    pub virtual_suffix: &'static str,
}

impl PathMapping {
    /// FLAC sources exposed as MP3
    pub const FLAC_TO_MP3: PathMapping = PathMapping {
        source_extension: ".flac",
        virtual_suffix: ".mp3",
    };

    fn matches_source(&self, path: &str) -> bool {
        if !ends_with_ignore_case(path, self.source_extension) {
            return false;
        }
        // `/.flac` is a dotfile, not a FLAC source with an empty stem
        let stem = &path[..path.len() - self.source_extension.len()];
        !stem.is_empty() && !stem.ends_with('/')
    }

    fn matches_virtual(&self, path: &str) -> bool {
        ends_with_ignore_case(path, self.virtual_suffix)
            && self.matches_source(&path[..path.len() - self.virtual_suffix.len()])
    }
}

/// Bidirectional mapping between the names a client sees and the files on the
/// source tree
#[derive(Debug, Clone)]
pub struct VirtualPathResolver {
    mappings: Vec<PathMapping>,
}

impl Default for VirtualPathResolver {
    fn default() -> Self {
        Self::new(vec![PathMapping::FLAC_TO_MP3])
    }
}

impl VirtualPathResolver {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        Self { mappings }
    }

    /// Map a client-visible path to the path on the source tree
    pub fn to_real(&self, virtual_path: &str) -> String {
        match self.mappings.iter().find(|m| m.matches_virtual(virtual_path)) {
            Some(mapping) => {
                virtual_path[..virtual_path.len() - mapping.virtual_suffix.len()].to_string()
            }
            None => virtual_path.to_string(),
        }
    }

    /// Map a path on the source tree to the name clients see
    pub fn to_virtual(&self, real_path: &str) -> String {
        match self.mappings.iter().find(|m| m.matches_source(real_path)) {
            Some(mapping) => format!("{}{}", real_path, mapping.virtual_suffix),
            None => real_path.to_string(),
        }
    }

    /// Whether a real path has a source extension some mapping transcodes
    pub fn is_transcodable(&self, path: &str) -> bool {
        self.mappings.iter().any(|m| m.matches_source(path))
    }

    /// Whether a client path carries a virtual suffix over a transcodable
    /// source name
    pub fn is_virtual(&self, path: &str) -> bool {
        self.mappings.iter().any(|m| m.matches_virtual(path))
    }

    /// Whether a client path names a transcodable source directly.
    ///
    /// Such names are never listed, so lookups on them must fail the same way
    /// a missing file does.
    pub fn is_hidden_source(&self, virtual_path: &str) -> bool {
        self.is_transcodable(virtual_path) && !self.is_virtual(virtual_path)
    }
}

fn ends_with_ignore_case(haystack: &str, suffix: &str) -> bool {
    let (h, s) = (haystack.as_bytes(), suffix.as_bytes());
    h.len() >= s.len() && h[h.len() - s.len()..].eq_ignore_ascii_case(s)
}
