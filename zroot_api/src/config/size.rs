use std::{fmt::Display, num::ParseIntError, str::FromStr};

/// A byte count written in human readable form, e.g. `512M` or `20G`.
/// Serialize and Deserialize are implemented by hand below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(pub u64);

impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl FromStr for Size {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        from_human_readable(s).map(Size)
    }
}

impl From<u64> for Size {
    fn from(n: u64) -> Self {
        Size(n)
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_human_readable(self.0))
    }
}

fn to_human_readable(x: u64) -> String {
    match x.trailing_zeros() {
        _ if x == 0 => "0".to_owned(),
        0..=9 => format!("{}", x),
        10..=19 => format!("{}K", x >> 10),
        20..=29 => format!("{}M", x >> 20),
        30..=39 => format!("{}G", x >> 30),
        _ => format!("{}T", x >> 40),
    }
}

fn from_human_readable(mut s: &str) -> Result<u64, ParseIntError> {
    s = s.trim();
    let try_parse = |val: &str, shift: u8| Ok(val.trim().parse::<u64>()? << shift);
    if let Some(p) = s.strip_suffix('K') {
        try_parse(p, 10)
    } else if let Some(p) = s.strip_suffix('M') {
        try_parse(p, 20)
    } else if let Some(p) = s.strip_suffix('G') {
        try_parse(p, 30)
    } else if let Some(p) = s.strip_suffix('T') {
        try_parse(p, 40)
    } else {
        try_parse(s, 0)
    }
}

impl<'de> serde::Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Size, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Sizes may come as strings ("2G") or plain numbers (1024), so go
        // through a generic value first.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => Size::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid size '{s}': {e}"))),
            serde_yaml::Value::Number(n) => n.as_u64().map(Size).ok_or_else(|| {
                serde::de::Error::custom("invalid size, expected unsigned integer")
            }),
            _ => Err(serde::de::Error::custom("invalid size")),
        }
    }
}

impl serde::Serialize for Size {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string() {
        assert_eq!(Size::from_str("1").unwrap(), Size(1));
        assert_eq!(Size::from_str("512M").unwrap(), Size(512 << 20));
        assert_eq!(Size::from_str("20G").unwrap(), Size(20 << 30));
        assert_eq!(Size::from_str(" 2 T ").unwrap(), Size(2 << 40));
        assert_eq!(Size::from_str("16K").unwrap(), Size(16 * 1024));

        assert!(Size::from_str("1.5G").is_err());
        assert!(Size::from_str("1 0K").is_err());
        assert!(Size::from_str("10X").is_err());
        assert!(Size::from_str("").is_err());
        assert!(Size::from_str("-1G").is_err());
    }

    #[test]
    fn test_to_human_readable() {
        assert_eq!(Size(0).to_string(), "0");
        assert_eq!(Size(1023).to_string(), "1023");
        assert_eq!(Size(1 << 20).to_string(), "1M");
        assert_eq!(Size(512 << 20).to_string(), "512M");
        assert_eq!(Size(20 << 30).to_string(), "20G");
        assert_eq!(Size((1 << 30) + (1 << 20)).to_string(), "1025M");
    }

    #[test]
    fn test_serde() {
        let size: Size = serde_yaml::from_str("2G").unwrap();
        assert_eq!(size, Size(2 << 30));

        let size: Size = serde_yaml::from_str("4096").unwrap();
        assert_eq!(size, Size(4096));

        assert!(serde_yaml::from_str::<Size>("[1]").is_err());
        assert!(serde_yaml::from_str::<Size>("-5").is_err());

        assert_eq!(serde_yaml::to_string(&Size(16 << 30)).unwrap(), "16G\n");
    }
}
