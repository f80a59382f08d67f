//! Cookie-jar backed store.
//!
//! A jar is a small text file holding one `name=value` entry per line,
//! the same shape as a browser's `document.cookie` split on `;`. Each
//! domain the client talks to gets its own jar file, and the session
//! token lives under an application-chosen name inside it. Entries owned
//! by other code are preserved on every rewrite.
//!
//! The entry has no expiry attribute: it lives until [`CookieStore::delete`]
//! or until something outside the client clears the jar.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokenkeeper_session::Session;

use crate::{SessionSlot, SessionStore, StoreError};

/// A [`SessionStore`] that keeps the raw token as a named jar entry.
#[derive(Debug)]
pub struct CookieStore {
    jar: PathBuf,
    name: String,
    current: SessionSlot,
}

impl CookieStore {
    /// Creates a store for the entry `name` inside the jar file at `jar`.
    ///
    /// The jar does not need to exist yet; it is created on first write.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidName`] if `name` is empty or contains
    /// `=`, `;` or whitespace.
    pub fn new(
        jar: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty()
            || name.chars().any(|c| c == '=' || c == ';' || c.is_whitespace())
        {
            return Err(StoreError::InvalidName(name));
        }

        Ok(Self {
            jar: jar.into(),
            name,
            current: SessionSlot::default(),
        })
    }

    /// Path of the jar file.
    pub fn jar(&self) -> &Path {
        &self.jar
    }

    /// Name of the session entry.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SessionStore for CookieStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let entries = read_jar(&self.jar)?;
        Ok(entries
            .into_iter()
            .find(|(name, value)| *name == self.name && !value.is_empty())
            .map(|(_, value)| value))
    }

    fn write(&self, session: Session) -> Result<(), StoreError> {
        let token = session.token();
        if token.chars().any(|c| c == ';' || c.is_whitespace()) {
            return Err(StoreError::InvalidValue(
                "token contains `;` or whitespace".into(),
            ));
        }

        let mut current = self.current.lock();
        let mut entries = read_jar(&self.jar)?;
        match entries.iter_mut().find(|(name, _)| *name == self.name) {
            Some(entry) => entry.1 = token.to_owned(),
            None => entries.push((self.name.clone(), token.to_owned())),
        }
        write_jar(&self.jar, &entries)?;
        *current = Some(session);

        tracing::debug!(jar = %self.jar.display(), name = %self.name, "session cookie written");
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        let mut entries = read_jar(&self.jar)?;
        let before = entries.len();
        entries.retain(|(name, _)| *name != self.name);
        if entries.len() != before {
            write_jar(&self.jar, &entries)?;
        }
        *current = None;

        tracing::debug!(jar = %self.jar.display(), name = %self.name, "session cookie deleted");
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.current.lock().clone()
    }
}

/// Reads all `name=value` entries. A missing jar is an empty jar.
fn read_jar(path: &Path) -> Result<Vec<(String, String)>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(contents
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_owned(), value.trim().to_owned()))
        })
        .collect())
}

/// Rewrites the jar through a sibling temp file so readers never see a
/// truncated jar.
fn write_jar(path: &Path, entries: &[(String, String)]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut contents = String::new();
    for (name, value) in entries {
        contents.push_str(name);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
