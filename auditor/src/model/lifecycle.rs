use std::fmt;

/// One lifecycle fact about a reservation.
///
/// `Unchanged` and `Unknown` are placeholders: they only describe a
/// reservation until a definitive tag is learned, and are cleared then.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleTag {
    Unchanged = 1,
    Canceled = 1 << 1,
    Converted = 1 << 2,
    SellSplitted = 1 << 3,
    Sold = 1 << 4,
    Unknown = 1 << 5,
}

impl LifecycleTag {
    pub const ALL: [LifecycleTag; 6] = [
        LifecycleTag::Unchanged,
        LifecycleTag::Canceled,
        LifecycleTag::Converted,
        LifecycleTag::SellSplitted,
        LifecycleTag::Sold,
        LifecycleTag::Unknown,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn is_placeholder(self) -> bool {
        matches!(self, LifecycleTag::Unchanged | LifecycleTag::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleTag::Unchanged => "unchanged",
            LifecycleTag::Canceled => "canceled",
            LifecycleTag::Converted => "converted",
            LifecycleTag::SellSplitted => "sell_splitted",
            LifecycleTag::Sold => "sold",
            LifecycleTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LifecycleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PLACEHOLDER_MASK: u8 = LifecycleTag::Unchanged as u8 | LifecycleTag::Unknown as u8;
const ALL_MASK: u8 = 0b11_1111;

/// Finite tag set stored as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Lifecycle(u8);

impl Lifecycle {
    pub const EMPTY: Lifecycle = Lifecycle(0);

    pub fn only(tag: LifecycleTag) -> Self {
        Self(tag.bit())
    }

    /// Unknown bits are dropped rather than rejected so a newer schema
    /// never poisons an older reader.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & ALL_MASK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, tag: LifecycleTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True once at least one terminal-ish fact is known.
    pub fn is_definitive(self) -> bool {
        self.0 & !PLACEHOLDER_MASK != 0
    }

    pub fn iter(self) -> impl Iterator<Item = LifecycleTag> {
        LifecycleTag::ALL
            .into_iter()
            .filter(move |tag| self.contains(*tag))
    }

    /// Transition applied when a classification pass observes `tag`.
    ///
    /// - definitive tags accumulate and wipe placeholders
    /// - a placeholder never overrides a definitive set
    /// - a placeholder replaces an older placeholder
    pub fn observe(self, tag: LifecycleTag) -> Self {
        if tag.is_placeholder() {
            if self.is_definitive() {
                Self(self.0 & !PLACEHOLDER_MASK)
            } else {
                Self::only(tag)
            }
        } else {
            Self((self.0 & !PLACEHOLDER_MASK) | tag.bit())
        }
    }

    /// Folds every tag of `other` into `self` with [`Lifecycle::observe`].
    pub fn merge(self, other: Lifecycle) -> Self {
        if other.is_definitive() {
            Self((self.0 | other.0) & !PLACEHOLDER_MASK)
        } else {
            other.iter().fold(self, |acc, tag| acc.observe(tag))
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(tag.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<LifecycleTag> for Lifecycle {
    fn from_iter<I: IntoIterator<Item = LifecycleTag>>(iter: I) -> Self {
        iter.into_iter().fold(Lifecycle::EMPTY, Lifecycle::observe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleTag::*;

    #[test]
    fn placeholder_is_replaced_by_definitive_tag() {
        let l = Lifecycle::only(Unchanged).observe(SellSplitted);
        assert!(l.contains(SellSplitted));
        assert!(!l.contains(Unchanged));
        assert_eq!(l.to_string(), "sell_splitted");
    }

    #[test]
    fn placeholder_does_not_override_definitive_tags() {
        let l = Lifecycle::only(Converted).observe(Unknown);
        assert_eq!(l, Lifecycle::only(Converted));

        let l = Lifecycle::only(Sold).observe(Unchanged);
        assert_eq!(l, Lifecycle::only(Sold));
    }

    #[test]
    fn newer_placeholder_replaces_older_one() {
        let l = Lifecycle::only(Unknown).observe(Unchanged);
        assert_eq!(l, Lifecycle::only(Unchanged));
    }

    #[test]
    fn definitive_tags_accumulate() {
        let l: Lifecycle = [SellSplitted, Sold].into_iter().collect();
        assert!(l.contains(SellSplitted) && l.contains(Sold));
        assert_eq!(l.to_string(), "sell_splitted,sold");
    }

    #[test]
    fn bits_round_trip_and_mask_unknown_bits() {
        let l: Lifecycle = [Canceled, Converted].into_iter().collect();
        assert_eq!(Lifecycle::from_bits(l.bits()), l);
        assert_eq!(Lifecycle::from_bits(0b1100_0000), Lifecycle::EMPTY);
    }

    #[test]
    fn empty_set_displays_as_empty_string() {
        assert_eq!(Lifecycle::EMPTY.to_string(), "");
        assert!(!Lifecycle::EMPTY.is_definitive());
    }
}
