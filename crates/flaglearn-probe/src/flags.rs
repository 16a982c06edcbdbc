use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// RFLAGS status bits the oracle can observe and permute, at their
    /// architectural bit positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u64 {
        /// Carry.
        const CF = 1 << 0;
        /// Parity.
        const PF = 1 << 2;
        /// Zero.
        const ZF = 1 << 6;
        /// Sign.
        const SF = 1 << 7;
        /// Overflow.
        const OF = 1 << 11;
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown status flag `{0}` (valid flags: CF, PF, ZF, SF, OF)")]
pub struct UnknownFlag(pub String);

impl Flags {
    /// Parse a comma-separated flag list such as `CF,ZF` (case-insensitive).
    pub fn parse_list(text: &str) -> Result<Self, UnknownFlag> {
        let mut flags = Flags::empty();
        for part in text.split(',') {
            let name = part.trim().to_ascii_uppercase();
            if name.is_empty() {
                continue;
            }
            let flag =
                Flags::from_name(&name).ok_or_else(|| UnknownFlag(part.trim().to_string()))?;
            flags |= flag;
        }
        Ok(flags)
    }

    /// Flag names in bit order, e.g. `["CF", "ZF"]`.
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }

    /// `FLAG_CF | FLAG_ZF` style literal, `0` when empty.
    pub fn literal(self) -> String {
        if self.is_empty() {
            return "0".to_string();
        }
        self.iter_names()
            .map(|(name, _)| format!("FLAG_{name}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_rflags() {
        assert_eq!(Flags::CF.bits(), 0x0001);
        assert_eq!(Flags::PF.bits(), 0x0004);
        assert_eq!(Flags::ZF.bits(), 0x0040);
        assert_eq!(Flags::SF.bits(), 0x0080);
        assert_eq!(Flags::OF.bits(), 0x0800);
    }

    #[test]
    fn parse_list_accepts_any_case_and_spacing() {
        assert_eq!(Flags::parse_list("CF,ZF").unwrap(), Flags::CF | Flags::ZF);
        assert_eq!(Flags::parse_list(" cf , of ").unwrap(), Flags::CF | Flags::OF);
        assert!(Flags::parse_list("CF,XX").is_err());
    }

    #[test]
    fn literal_renders_in_bit_order() {
        assert_eq!(Flags::empty().literal(), "0");
        assert_eq!((Flags::ZF | Flags::CF).literal(), "FLAG_CF | FLAG_ZF");
    }

    #[test]
    fn names_follow_bit_order() {
        assert_eq!((Flags::OF | Flags::PF).names(), vec!["PF", "OF"]);
    }
}
