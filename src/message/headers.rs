//! Ordered, case-insensitive, multi-valued header map.

/// Protocol headers carried by a [`Message`](super::Message).
///
/// Lookups ignore ASCII case. The casing of the first insertion of a name is
/// kept and used when the headers are written to the wire. Names keep
/// insertion order and every name keeps the order of its values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl ProtocolHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// All values of `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|i| self.entries[i].1.as_slice())
    }

    /// First value of `name`.
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        let i = self.position(name)?;
        Some(&mut self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace all values of `name`, keeping the original casing if present.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = values,
            None => self.entries.push((name.to_string(), values)),
        }
    }

    /// Replace all values of `name` with a single value.
    pub fn set_single(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, vec![value.into()]);
    }

    /// Append a value to `name`, creating it if needed.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self.entries.push((name.to_string(), vec![value.into()])),
        }
    }

    /// Set `name` only if it has no entry yet.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if !self.contains(name) {
            self.set_single(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let i = self.position(name)?;
        Some(self.entries.remove(i).1)
    }

    /// Iterate `(name, values)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ProtocolHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = ProtocolHeaders::new();
        for (name, value) in iter {
            headers.append(&name.into(), value);
        }
        headers
    }
}
