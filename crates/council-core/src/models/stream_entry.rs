use tracing::debug;

/// Incremental output of a single contributor within one stage.
///
/// `text` only ever grows by append, and once `complete` is set the entry
/// rejects every further change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamEntry {
    pub text: String,
    pub complete: bool,
    pub error: bool,
}

impl StreamEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry built directly from a contributor's final text, for when the
    /// completion arrives without any preceding tokens.
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            complete: true,
            error: false,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            text: format!("Error: {}", error),
            complete: true,
            error: true,
        }
    }

    /// Append a token fragment. Returns false if the entry is already final.
    pub fn append(&mut self, fragment: &str) -> bool {
        if self.complete {
            return false;
        }
        self.text.push_str(fragment);
        true
    }

    pub fn mark_complete(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.complete = true;
        true
    }

    pub fn mark_failed(&mut self, error: &str) -> bool {
        if self.complete {
            return false;
        }
        *self = Self::failed(error);
        true
    }
}

/// Per-contributor stream buffers for one stage, in first-arrival order.
///
/// Contributor counts are small (a handful of models), so a vector keeps the
/// render order stable without pulling in an ordered map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingAccumulator {
    entries: Vec<(String, StreamEntry)>,
}

impl StreamingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contributor: &str) -> Option<&StreamEntry> {
        self.entries
            .iter()
            .find(|(id, _)| id == contributor)
            .map(|(_, entry)| entry)
    }

    fn entry_mut(&mut self, contributor: &str) -> Option<&mut StreamEntry> {
        self.entries
            .iter_mut()
            .find(|(id, _)| id == contributor)
            .map(|(_, entry)| entry)
    }

    fn get_or_insert(&mut self, contributor: &str) -> &mut StreamEntry {
        let idx = match self.entries.iter().position(|(id, _)| id == contributor) {
            Some(idx) => idx,
            None => {
                self.entries
                    .push((contributor.to_string(), StreamEntry::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn append_token(&mut self, contributor: &str, fragment: &str) {
        if !self.get_or_insert(contributor).append(fragment) {
            debug!(contributor = %contributor, "Ignoring token for finished contributor");
        }
    }

    pub fn complete(&mut self, contributor: &str, final_text: &str) {
        match self.entry_mut(contributor) {
            Some(entry) => {
                entry.mark_complete();
            }
            None => self
                .entries
                .push((contributor.to_string(), StreamEntry::completed(final_text))),
        }
    }

    pub fn fail(&mut self, contributor: &str, error: &str) {
        match self.entry_mut(contributor) {
            Some(entry) => {
                if !entry.mark_failed(error) {
                    debug!(contributor = %contributor, "Ignoring error for finished contributor");
                }
            }
            None => self
                .entries
                .push((contributor.to_string(), StreamEntry::failed(error))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StreamEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Contributors whose output finished without error.
    pub fn succeeded(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.complete && !entry.error)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.error)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
