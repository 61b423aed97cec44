use super::pattern::Pattern;
use serde::{Deserialize, Serialize};

/// DMI identity of the host
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostInfo {
    pub board_name: Option<String>,
    pub board_vendor: Option<String>,
    pub product_name: Option<String>,
    pub sys_vendor: Option<String>,
    pub cpu_vendor: Option<String>,
}

impl HostInfo {
    /// Fills every field missing here from `fallback`
    pub fn or(self, fallback: &HostInfo) -> HostInfo {
        HostInfo {
            board_name: self.board_name.or_else(|| fallback.board_name.clone()),
            board_vendor: self.board_vendor.or_else(|| fallback.board_vendor.clone()),
            product_name: self.product_name.or_else(|| fallback.product_name.clone()),
            sys_vendor: self.sys_vendor.or_else(|| fallback.sys_vendor.clone()),
            cpu_vendor: self.cpu_vendor.or_else(|| fallback.cpu_vendor.clone()),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DmiMatch {
    pub board_name: Option<Pattern>,
    pub board_vendor: Option<Pattern>,
    pub product_name: Option<Pattern>,
    pub sys_vendor: Option<Pattern>,
    pub cpu_vendor: Option<Pattern>,
}

/// One entry of a profile's `matches` list
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostMatch {
    pub dmi_data: Option<DmiMatch>,
}

// Ein gesetztes Feld ohne Host-Wert gilt als nicht erfüllt
fn field(pattern: &Option<Pattern>, value: &Option<String>) -> bool {
    match (pattern, value) {
        (None, _) => true,
        (Some(pattern), Some(value)) => pattern.matches(value),
        (Some(_), None) => false,
    }
}

impl HostMatch {
    pub fn matches(&self, host: &HostInfo) -> bool {
        match &self.dmi_data {
            Some(dmi) => {
                field(&dmi.board_name, &host.board_name)
                    && field(&dmi.board_vendor, &host.board_vendor)
                    && field(&dmi.product_name, &host.product_name)
                    && field(&dmi.sys_vendor, &host.sys_vendor)
                    && field(&dmi.cpu_vendor, &host.cpu_vendor)
            }
            None => true,
        }
    }
}

/// A profile is eligible when its list is empty or any entry holds
pub fn host_eligible(matches: &[HostMatch], host: &HostInfo) -> bool {
    matches.is_empty() || matches.iter().any(|m| m.matches(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ally() -> HostInfo {
        HostInfo {
            board_name: Some("RC71L".to_string()),
            sys_vendor: Some("ASUSTeK COMPUTER INC.".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_list_is_always_eligible() {
        assert!(host_eligible(&[], &HostInfo::default()));
    }

    #[test]
    fn any_entry_may_hold() {
        let matches: Vec<HostMatch> = serde_yaml::from_str(
            r#"
- dmi_data:
    board_name: RC72LA
- dmi_data:
    board_name: RC71L
    sys_vendor: ASUSTeK*
"#,
        )
        .unwrap();
        assert!(host_eligible(&matches, &ally()));
        assert!(!host_eligible(&matches[..1], &ally()));
    }

    #[test]
    fn unknown_host_fields_do_not_match() {
        let matches: Vec<HostMatch> =
            serde_yaml::from_str("- dmi_data:\n    product_name: \"ROG Ally*\"\n").unwrap();
        assert!(!host_eligible(&matches, &ally()));
    }

    #[test]
    fn overrides_fill_missing_fields() {
        let supplied = HostInfo {
            board_name: Some("RC72LA".to_string()),
            ..Default::default()
        };
        let merged = supplied.or(&ally());
        assert_eq!(merged.board_name.as_deref(), Some("RC72LA"));
        assert_eq!(merged.sys_vendor.as_deref(), Some("ASUSTeK COMPUTER INC."));
    }
}
