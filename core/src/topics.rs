/// One or more topic names a publisher or consumer is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topics(Vec<String>);

impl Topics {
    pub fn new(names: Vec<String>) -> Self {
        Topics(names)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.0.iter().any(|t| t == topic)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Names in first-seen order with duplicates removed.
    pub fn unique(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.0.len());
        for name in &self.0 {
            if !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        seen
    }
}

impl From<&str> for Topics {
    fn from(name: &str) -> Self {
        Topics(vec![name.to_string()])
    }
}

impl From<String> for Topics {
    fn from(name: String) -> Self {
        Topics(vec![name])
    }
}

impl From<&String> for Topics {
    fn from(name: &String) -> Self {
        Topics(vec![name.clone()])
    }
}

impl From<Vec<String>> for Topics {
    fn from(names: Vec<String>) -> Self {
        Topics(names)
    }
}

impl From<Vec<&str>> for Topics {
    fn from(names: Vec<&str>) -> Self {
        Topics(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Topics {
    fn from(names: &[&str]) -> Self {
        Topics(names.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for Topics {
    fn from(names: &[String]) -> Self {
        Topics(names.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(names: [&str; N]) -> Self {
        Topics(names.iter().map(|s| s.to_string()).collect())
    }
}

impl<'a> IntoIterator for &'a Topics {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_keeps_first_seen_order() {
        let topics = Topics::from(["foo", "bar", "bar", "foo", "qaz"]);
        assert_eq!(topics.unique(), vec!["foo", "bar", "qaz"]);
        assert_eq!(topics.len(), 5);
    }

    #[test]
    fn test_single_name() {
        let topics = Topics::from("foo");
        assert!(topics.contains("foo"));
        assert!(!topics.contains("bar"));
    }
}
