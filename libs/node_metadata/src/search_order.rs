use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{EnumString, VariantNames};

use crate::error::MetadataError;

/// The sources instance metadata can be read from, named the way the
/// `search-order` option spells them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, strum_macros::Display, VariantNames,
)]
pub enum MetadataSourceKind {
    #[strum(serialize = "configDrive")]
    ConfigDrive,
    #[strum(serialize = "metadataService")]
    MetadataService,
}

const MAX_SEARCH_ORDER_ELEMENTS: usize = 2;

/// Validated `search-order` value: one or two distinct sources, tried in the listed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchOrder(Vec<MetadataSourceKind>);

impl SearchOrder {
    pub fn new(sources: Vec<MetadataSourceKind>) -> Result<Self, MetadataError> {
        if sources.is_empty() {
            return Err(MetadataError::InvalidSearchOrder(
                "value cannot be empty".to_string(),
            ));
        }
        if sources.len() > MAX_SEARCH_ORDER_ELEMENTS {
            return Err(MetadataError::InvalidSearchOrder(format!(
                "value cannot contain more than {MAX_SEARCH_ORDER_ELEMENTS} elements"
            )));
        }
        if sources.len() == 2 && sources[0] == sources[1] {
            return Err(MetadataError::InvalidSearchOrder(format!(
                "element {:?} is listed more than once",
                sources[0].to_string()
            )));
        }
        Ok(SearchOrder(sources))
    }

    pub fn iter(&self) -> impl Iterator<Item = MetadataSourceKind> + '_ {
        self.0.iter().copied()
    }

    pub fn sources(&self) -> &[MetadataSourceKind] {
        &self.0
    }
}

impl Default for SearchOrder {
    fn default() -> Self {
        SearchOrder(vec![
            MetadataSourceKind::ConfigDrive,
            MetadataSourceKind::MetadataService,
        ])
    }
}

impl FromStr for SearchOrder {
    type Err = MetadataError;

    fn from_str(order: &str) -> Result<Self, Self::Err> {
        use strum::VariantNames;

        if order.trim().is_empty() {
            return Err(MetadataError::InvalidSearchOrder(
                "value cannot be empty".to_string(),
            ));
        }

        let elements = order.split(',').collect::<Vec<_>>();
        if elements.len() > MAX_SEARCH_ORDER_ELEMENTS {
            return Err(MetadataError::InvalidSearchOrder(format!(
                "value cannot contain more than {MAX_SEARCH_ORDER_ELEMENTS} elements"
            )));
        }

        let sources = elements
            .into_iter()
            .map(str::trim)
            .map(|id| {
                MetadataSourceKind::from_str(id).map_err(|_| {
                    MetadataError::InvalidSearchOrder(format!(
                        "invalid element {id:?}, supported elements include {:?}",
                        MetadataSourceKind::VARIANTS
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        SearchOrder::new(sources)
    }
}

impl fmt::Display for SearchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for source in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{source}")?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<String> for SearchOrder {
    type Error = MetadataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchOrder> for String {
    fn from(order: SearchOrder) -> Self {
        order.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MetadataSourceKind::*;

    #[test]
    fn parses_valid_orders() {
        let order: SearchOrder = "configDrive,metadataService".parse().unwrap();
        assert_eq!(order.sources(), &[ConfigDrive, MetadataService]);

        let order: SearchOrder = " metadataService , configDrive ".parse().unwrap();
        assert_eq!(order.sources(), &[MetadataService, ConfigDrive]);

        let order: SearchOrder = "metadataService".parse().unwrap();
        assert_eq!(order.sources(), &[MetadataService]);
        assert_eq!(order.to_string(), "metadataService");
    }

    #[test]
    fn rejects_invalid_orders() {
        for order in [
            "",
            "   ",
            "configDrive,metadataService,configDrive",
            "metadataService,metadataService",
            "configdrive",
            "metadataService,",
            "cloudInit",
        ] {
            let err = order.parse::<SearchOrder>().unwrap_err();
            assert!(
                matches!(err, MetadataError::InvalidSearchOrder(_)),
                "{order:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn invalid_element_is_named() {
        let err = "configDrive,cloudInit".parse::<SearchOrder>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"cloudInit\""), "{message}");
        assert!(message.contains("configDrive"), "{message}");
        assert!(message.contains("metadataService"), "{message}");
    }

    #[test]
    fn default_tries_config_drive_first() {
        assert_eq!(
            SearchOrder::default().to_string(),
            "configDrive,metadataService"
        );
    }
}
