//! # Parameter files
//!
//! Parameters are TOML files deserialised straight into the owning module's `Params` struct.
//! Binaries find them under `<CORRIDOR_SW_ROOT>/params`; tests usually give a path directly.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("CORRIDOR_SW_ROOT is not set, cannot locate the params directory")]
    SwRootNotSet,

    #[error("Could not read {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Invalid parameters: {0}")]
    DeserialiseError(toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load `<CORRIDOR_SW_ROOT>/params/<file_name>`.
pub fn load<P: DeserializeOwned>(file_name: &str) -> Result<P, LoadError> {
    let root = crate::host::get_sw_root().map_err(|_| LoadError::SwRootNotSet)?;

    load_path(root.join("params").join(file_name))
}

pub fn load_path<P: DeserializeOwned, Q: AsRef<Path>>(path: Q) -> Result<P, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| LoadError::FileLoadError(path.into(), e))?;

    parse(&text)
}

/// Deserialise parameters from TOML text.
pub fn parse<P: DeserializeOwned>(text: &str) -> Result<P, LoadError> {
    toml::from_str(text).map_err(LoadError::DeserialiseError)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct TestParams {
        rate_hz: f64,
        names: Vec<String>,
    }

    #[test]
    fn test_parse() {
        let p: TestParams = parse("rate_hz = 10.0\nnames = [\"a\", \"b\"]\n").unwrap();

        assert_eq!(p.rate_hz, 10.0);
        assert_eq!(p.names, vec![String::from("a"), String::from("b")]);

        assert!(matches!(
            parse::<TestParams>("rate_hz = \"fast\""),
            Err(LoadError::DeserialiseError(_))
        ));
    }

    #[test]
    fn test_load_path_missing_file() {
        assert!(matches!(
            load_path::<TestParams, _>("/nonexistent/params.toml"),
            Err(LoadError::FileLoadError(..))
        ));
    }
}
