use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Where a transaction was last written in the spreadsheet mirror: the month sheet and the
/// 1-based row number (row 1 is the header). Serializes to a string like `"March!7"`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MirrorRef {
    sheet: String,
    row: usize,
}

impl MirrorRef {
    pub fn new(sheet: impl Into<String>, row: usize) -> Self {
        Self {
            sheet: sheet.into(),
            row,
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn row(&self) -> usize {
        self.row
    }
}

impl fmt::Display for MirrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.row)
    }
}

impl FromStr for MirrorRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sheet, row) = s
            .rsplit_once('!')
            .ok_or_else(|| anyhow::anyhow!("MirrorRef must be in format 'sheet!row', got: {s}"))?;
        if sheet.is_empty() {
            anyhow::bail!("MirrorRef is missing the sheet name: {s}");
        }
        let row = row
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("Invalid row number in '{s}': {e}"))?;
        if row < 2 {
            anyhow::bail!("MirrorRef must point below the header row, got: {s}");
        }
        Ok(MirrorRef::new(sheet, row))
    }
}

impl Serialize for MirrorRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MirrorRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MirrorRef::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_ref_display() {
        assert_eq!(MirrorRef::new("March", 7).to_string(), "March!7");
        assert_eq!(MirrorRef::new("Março", 12).to_string(), "Março!12");
    }

    #[test]
    fn test_mirror_ref_from_str() {
        let r: MirrorRef = "January!2".parse().unwrap();
        assert_eq!(r, MirrorRef::new("January", 2));

        // Sheet names may themselves contain '!'
        let r: MirrorRef = " Wow!Sheet!40 ".parse().unwrap();
        assert_eq!(r.sheet(), "Wow!Sheet");
        assert_eq!(r.row(), 40);
    }

    #[test]
    fn test_mirror_ref_from_str_invalid() {
        assert!("January".parse::<MirrorRef>().is_err());
        assert!("!5".parse::<MirrorRef>().is_err());
        assert!("January!x".parse::<MirrorRef>().is_err());
        assert!("January!1".parse::<MirrorRef>().is_err());
    }

    #[test]
    fn test_mirror_ref_serde() {
        let json = serde_json::to_string(&MirrorRef::new("May", 3)).unwrap();
        assert_eq!(json, r#""May!3""#);
        let back: MirrorRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MirrorRef::new("May", 3));
    }
}
