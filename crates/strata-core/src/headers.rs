//! Ordered, multi-valued header storage.
//!
//! [`HeaderBag`] is shared by [`RequestContext`](crate::RequestContext) and
//! [`Response`](crate::Response). Lookups ignore ASCII case, while the name
//! casing used at insertion time is kept for output.

/// An ordered list of header name/value pairs.
///
/// # Example
///
/// ```
/// use strata_core::HeaderBag;
///
/// let mut headers = HeaderBag::new();
/// headers.append("X-Trace", "a");
/// headers.append("x-trace", "b");
///
/// assert_eq!(headers.get("X-TRACE"), Some("a"));
/// assert_eq!(headers.get_all("x-trace"), vec!["a", "b"]);
/// assert_eq!(headers.iter().next(), Some(("X-Trace", "a")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag {
    entries: Vec<(String, String)>,
}

impl HeaderBag {
    /// Creates an empty header bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns every value stored under `name`, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Returns `true` if at least one value is stored under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Adds a value without touching existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces all values stored under `name` with a single value.
    ///
    /// The new entry takes the position of the first existing entry, so
    /// overwriting a header does not move it to the end of the output.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(first) => {
                self.entries[first] = (name.clone(), value);
                let mut index = 0;
                self.entries.retain(|(key, _)| {
                    let keep = index <= first || !key.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes every value stored under `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Iterates over all entries in output order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns the number of stored values (not distinct names).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no headers are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderBag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (name, value) in iter {
            bag.append(name, value);
        }
        bag
    }
}

impl From<&http::HeaderMap> for HeaderBag {
    fn from(map: &http::HeaderMap) -> Self {
        map.iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }
}
