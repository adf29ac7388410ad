//! Session cookie translation.
//!
//! A replayed login makes the target issue a fresh session id. Later
//! replayed requests still carry the id that was recorded, so the mutator
//! remembers which new id was issued for each recorded id and rewrites the
//! outgoing `Cookie` header accordingly.

use dashmap::DashMap;
use traffic_codec::Headers;
use tracing::debug;

/// Returns the value of cookie `key` in a `Cookie` or `Set-Cookie` value.
///
/// The header is split on `;`, each `name=value` pair is trimmed and split
/// at its first `=`. Names match case-sensitively and pairs without `=`
/// are skipped.
pub fn cookie_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim())
}

/// Replaces the value of cookie `key`, leaving the rest of the header as is.
///
/// Returns `None` if the cookie is not present.
pub fn replace_cookie_value(header: &str, key: &str, value: &str) -> Option<String> {
    let mut replaced = false;
    let pairs: Vec<String> = header
        .split(';')
        .map(|pair| {
            if !replaced {
                if let Some((name, _)) = pair.split_once('=') {
                    if name.trim() == key {
                        replaced = true;
                        return format!("{name}={value}");
                    }
                }
            }
            pair.to_string()
        })
        .collect();
    replaced.then(|| pairs.join(";"))
}

/// Recorded session id → session id issued during replay.
///
/// Entries are only ever added. Access is sharded, so lookups and captures
/// for different ids do not contend; the same id is serialized on its shard.
#[derive(Debug, Default)]
pub struct SessionTable {
    ids: DashMap<String, String>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the replacement for a recorded id.
    pub fn get(&self, original: &str) -> Option<String> {
        self.ids.get(original).map(|entry| entry.value().clone())
    }

    /// Records a replacement, returning the one it superseded.
    pub fn insert(&self, original: impl Into<String>, replacement: impl Into<String>) -> Option<String> {
        self.ids.insert(original.into(), replacement.into())
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A rewrite applied to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRewrite {
    /// Recorded session id.
    pub original: String,
    /// Id sent instead.
    pub replacement: String,
}

/// Rewrites recorded session cookies and learns new ones from responses.
#[derive(Debug)]
pub struct SessionMutator {
    key: String,
    table: SessionTable,
}

impl SessionMutator {
    /// Creates a mutator tracking the cookie named `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            table: SessionTable::new(),
        }
    }

    /// Cookie name carrying the session id.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The translation table.
    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Session id carried by the recorded request, if any.
    pub fn original_session(&self, original: &Headers) -> Option<String> {
        original
            .get_all("cookie")
            .find_map(|header| cookie_value(header, &self.key))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Substitutes the replacement session id into `outgoing`.
    ///
    /// The recorded id is read from `original` (the headers as captured), not
    /// from `outgoing`. Without a known replacement nothing changes and the
    /// recorded id goes out as is.
    pub fn translate(&self, original: &Headers, outgoing: &mut Headers) -> Option<SessionRewrite> {
        let original_id = self.original_session(original)?;
        let replacement = self.table.get(&original_id)?;

        let rewritten: Vec<String> = outgoing
            .get_all("cookie")
            .map(|header| {
                if cookie_value(header, &self.key) == Some(original_id.as_str()) {
                    replace_cookie_value(header, &self.key, &replacement)
                        .unwrap_or_else(|| header.to_string())
                } else {
                    header.to_string()
                }
            })
            .collect();
        if rewritten.len() == 1 {
            outgoing.set("cookie", rewritten[0].as_str());
        } else {
            outgoing.remove("cookie");
            for header in rewritten {
                outgoing.append("cookie", header);
            }
        }

        debug!(original = %original_id, replacement = %replacement, "rewriting session id");
        Some(SessionRewrite {
            original: original_id,
            replacement,
        })
    }

    /// Learns the session id issued in a response.
    ///
    /// Scans `Set-Cookie` values in order and records the first non-empty
    /// session cookie; later ones in the same response are ignored. A
    /// cleared cookie (`sid=; Max-Age=0`) is not a new id. Requests that
    /// had no recorded session id learn nothing.
    pub fn capture(&self, original: &Headers, response: &Headers) -> Option<SessionRewrite> {
        let original_id = self.original_session(original)?;
        let issued = response
            .get_all("set-cookie")
            .find_map(|header| cookie_value(header, &self.key).filter(|id| !id.is_empty()))?
            .to_string();

        debug!(original = %original_id, issued = %issued, "captured new session id");
        self.table.insert(original_id.clone(), issued.clone());
        Some(SessionRewrite {
            original: original_id,
            replacement: issued,
        })
    }
}
