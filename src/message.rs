//! Onboarding protocol vocabulary
//!
//! Every onboarding message is a bare UTF-8 string. This module holds the
//! fixed control words and the serialization of listings sent to clients.

/// Separator between entries of any listing
pub const LISTING_SEPARATOR: &str = ";";

/// Longest accepted room name, in bytes
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// Longest accepted username, in bytes
///
/// A full room's encrypted user listing must still fit in one frame.
pub const MAX_USERNAME_LEN: usize = 64;

/// Server → Client control words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Room exists / password accepted
    Ack,
    /// Password rejected
    Nack,
    /// Room does not exist yet
    New,
    /// Room requires a password
    Password,
    /// Room has no password
    NoPass,
}

impl Reply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::Ack => "ACK",
            Reply::Nack => "NACK",
            Reply::New => "NEW",
            Reply::Password => "PASSWORD",
            Reply::NoPass => "NOPASS",
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a client message confirms room creation
pub fn is_ack(text: &str) -> bool {
    text == Reply::Ack.as_str()
}

/// Serialize the popular-rooms advert: `name count;name count`
///
/// No trailing separator; an empty slice yields an empty string.
pub fn format_popular_rooms(rooms: &[(String, i64)]) -> String {
    join_listing(rooms.iter().map(|(name, count)| format!("{} {}", name, count)))
}

/// Join listing entries with the listing separator
pub fn join_listing<I, S>(entries: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, entry) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push_str(LISTING_SEPARATOR);
        }
        out.push_str(entry.as_ref());
    }
    out
}
