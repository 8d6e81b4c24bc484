//! `KeywordDetection`: one hardware-reported wake-word event.

/// Immutable record produced by a `HardwareController` on a successful read.
///
/// `begin`/`end` are in the controller's own sample-counter space, not the
/// stream's. `None` means the hardware could not say where the keyword sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordDetection {
    begin: Option<i64>,
    end: Option<i64>,
    keyword: String,
}

impl KeywordDetection {
    pub fn new(begin: i64, end: i64, keyword: impl Into<String>) -> Self {
        Self {
            begin: Some(begin),
            end: Some(end),
            keyword: keyword.into(),
        }
    }

    /// A detection whose position is unknown ("the keyword just ended").
    pub fn unspecified(keyword: impl Into<String>) -> Self {
        Self {
            begin: None,
            end: None,
            keyword: keyword.into(),
        }
    }

    /// Build from raw hardware counters, where a negative value is the
    /// device's "unspecified" sentinel.
    pub fn from_raw(begin: i64, end: i64, keyword: impl Into<String>) -> Self {
        Self {
            begin: (begin >= 0).then_some(begin),
            end: (end >= 0).then_some(end),
            keyword: keyword.into(),
        }
    }

    pub fn begin(&self) -> Option<i64> {
        self.begin
    }

    pub fn end(&self) -> Option<i64> {
        self.end
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_raw_counters_become_unspecified() {
        let d = KeywordDetection::from_raw(-1, -1, "alexa");
        assert_eq!(d.begin(), None);
        assert_eq!(d.end(), None);
        assert_eq!(d, KeywordDetection::unspecified("alexa"));
    }

    #[test]
    fn partially_known_offsets_keep_the_known_half() {
        let d = KeywordDetection::from_raw(120, -1, "alexa");
        assert_eq!(d.begin(), Some(120));
        assert_eq!(d.end(), None);
    }

    #[test]
    fn concrete_offsets_round_through_accessors() {
        let d = KeywordDetection::new(100, 500, "hello");
        assert_eq!(d.begin(), Some(100));
        assert_eq!(d.end(), Some(500));
        assert_eq!(d.keyword(), "hello");
    }
}
