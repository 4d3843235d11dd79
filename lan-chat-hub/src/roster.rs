use std::{fmt, net::IpAddr};

/// Marker that distinguishes roster frames from chat lines.
pub const ROSTER_SENTINEL: &str = "[USER_LIST]:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub username: String,
    pub ip: IpAddr,
}

impl fmt::Display for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.username, self.ip)
    }
}

/// Point-in-time view of the chat participants, sorted by their
/// `username,ip` rendering so equal sets always produce equal frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    entries: Vec<RosterEntry>,
}

impl RosterSnapshot {
    pub fn new(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut entries: Vec<RosterEntry> = entries.into_iter().collect();
        entries.sort_by_cached_key(ToString::to_string);
        Self { entries }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Renders the snapshot as a single roster frame.
    pub fn to_frame(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RosterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROSTER_SENTINEL)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(";")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}
