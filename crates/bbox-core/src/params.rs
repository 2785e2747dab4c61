//! Parsing of `buildTypeID;branchName;downloadArtifacts;k1=v1&k2=v2`
//! combination strings into [`BuildRequest`]s.

use std::collections::BTreeMap;

use crate::domain::request::{validate_branch_name, validate_build_type_id};
use crate::domain::{BuildRequest, ValidationError};

const COMBINATION_PARTS: usize = 4;

/// Parse one combination string.
///
/// `require_artifacts` is applied to the resulting request; it only matters
/// when the combination asks for artifacts to be downloaded.
pub fn parse_combination(
    input: &str,
    require_artifacts: bool,
) -> Result<BuildRequest, ValidationError> {
    let parts: Vec<&str> = input.split(';').collect();
    let &[build_type_id, branch_name, download, properties] = parts.as_slice() else {
        return Err(ValidationError::MalformedCombination {
            input: input.to_string(),
            reason: format!(
                "expected {COMBINATION_PARTS} ';'-separated parts \
                 (buildTypeID;branchName;downloadArtifacts;key1=value1&key2=value2), found {}",
                parts.len()
            ),
        });
    };

    validate_build_type_id(build_type_id)?;
    validate_branch_name(branch_name)?;
    let download = parse_flag(download)?;
    let properties = parse_properties(properties)?;

    Ok(BuildRequest::new(build_type_id, branch_name, properties)?
        .with_artifacts(download, require_artifacts))
}

/// Parse every combination, stopping at the first invalid one.
pub fn parse_combinations<S: AsRef<str>>(
    inputs: &[S],
    require_artifacts: bool,
) -> Result<Vec<BuildRequest>, ValidationError> {
    inputs
        .iter()
        .map(|input| parse_combination(input.as_ref(), require_artifacts))
        .collect()
}

/// Accepts `1`, `t`, `true`, `0`, `f`, `false` in any case.
pub fn parse_flag(raw: &str) -> Result<bool, ValidationError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(ValidationError::InvalidFlag(raw.to_string())),
    }
}

/// Parse `k1=v1&k2=v2`. An empty string yields no properties; a repeated
/// key keeps its last value.
pub fn parse_properties(raw: &str) -> Result<BTreeMap<String, String>, ValidationError> {
    let mut properties = BTreeMap::new();
    if raw.is_empty() {
        return Ok(properties);
    }

    for pair in raw.split('&') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ValidationError::MalformedProperty(pair.to_string()))?;
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_full_combination() {
        let req = parse_combination("Proj_Build;release/1.0;true;env.A=1&env.B=x:y", true).unwrap();
        assert_eq!(req.build_type_id(), "Proj_Build");
        assert_eq!(req.branch_name(), "release/1.0");
        assert!(req.download_artifacts());
        assert!(req.require_artifacts());
        assert_eq!(req.properties().get("env.A").map(String::as_str), Some("1"));
        assert_eq!(req.properties().get("env.B").map(String::as_str), Some("x:y"));
    }

    #[test]
    fn test_empty_properties_part() {
        let req = parse_combination("bt2;main;0;", false).unwrap();
        assert!(!req.download_artifacts());
        assert!(req.properties().is_empty());
    }

    #[test]
    fn test_wrong_part_count() {
        for input in ["bt1;main;true", "bt1;main;true;a=1;extra", ""] {
            assert!(
                matches!(
                    parse_combination(input, false),
                    Err(ValidationError::MalformedCombination { .. })
                ),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_flag_variants() {
        for raw in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_flag(raw), Ok(true), "{raw}");
        }
        for raw in ["0", "f", "F", "false", "FALSE"] {
            assert_eq!(parse_flag(raw), Ok(false), "{raw}");
        }
        assert_eq!(
            parse_flag("yes"),
            Err(ValidationError::InvalidFlag("yes".to_string()))
        );
    }

    #[test]
    fn test_bad_parts_name_the_culprit() {
        assert_eq!(
            parse_combination("bad id;main;true;", false).unwrap_err(),
            ValidationError::InvalidBuildTypeId("bad id".to_string())
        );
        assert_eq!(
            parse_combination("bt;/main;true;", false).unwrap_err(),
            ValidationError::InvalidBranch("/main".to_string())
        );
        assert_eq!(
            parse_combination("bt;main;true;novalue", false).unwrap_err(),
            ValidationError::MalformedProperty("novalue".to_string())
        );
        assert_eq!(
            parse_combination("bt;main;true;a=1&", false).unwrap_err(),
            ValidationError::MalformedProperty(String::new())
        );
    }

    #[test]
    fn test_properties_split_on_first_equals() {
        let props = parse_properties("expr=a=b&k=").unwrap();
        assert_eq!(props.get("expr").map(String::as_str), Some("a=b"));
        assert_eq!(props.get("k").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_many_stops_at_first_error() {
        let inputs = ["bt1;main;true;", "bt2;main;maybe;"];
        assert_eq!(
            parse_combinations(&inputs, false).unwrap_err(),
            ValidationError::InvalidFlag("maybe".to_string())
        );
    }
}
