use std::collections::HashMap;

use bson::Bson;

use crate::error::Error;

/// Parameter name → value binding consulted for `"$name"` string values.
pub type ParamMap = HashMap<String, Bson>;

/// Build the binding map from a flat `[k1, v1, k2, v2, …]` pair list.
///
/// Keys must be `Bson::String`; a later pair overwrites an earlier one with
/// the same key.
pub fn param_map(pairs: &[Bson]) -> Result<ParamMap, Error> {
    if pairs.is_empty() {
        return Ok(ParamMap::new());
    }
    if pairs.len() % 2 != 0 {
        return Err(Error::Parameter(
            "parameters must be string key and value pairs".into(),
        ));
    }

    let mut map = ParamMap::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks_exact(2) {
        let Bson::String(key) = &pair[0] else {
            return Err(Error::Parameter(format!(
                "parameter key {} must be a string",
                pair[0]
            )));
        };
        map.insert(key.clone(), pair[1].clone());
    }
    Ok(map)
}

/// Build a flat parameter pair list:
/// `params!["$1" => "abc", "$2" => 12]`.
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::Bson>::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {
        vec![$($crate::Bson::from($key), $crate::Bson::from($value)),+]
    };
}
