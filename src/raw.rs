//! Schema source records: the authored grammar as plain strings.
//!
//! These mirror what a grammar loader hands over before any interpretation.
//! Every attribute is kept as written (unset = empty) so [`crate::transform`]
//! can report bad values instead of failing deserialization. JSON is the
//! shipped concrete syntax.
//!
//! Elements are externally tagged by kind:
//!
//! ```json
//! { "number": { "id": 3, "name": "size", "length": "4", "endian": "big" } }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawUfwb {
    pub version: String,
    pub grammar: RawGrammar,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawGrammar {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub author: String,
    #[serde(alias = "fileextension")]
    pub ext: String,
    pub email: String,
    pub complete: String,
    pub uti: String,
    /// Reference to the start structure: `id:<n>` or a name.
    pub start: String,
    pub elements: Vec<RawElement>,
    pub scripts: Vec<RawScript>,
}

/// Attributes every element kind carries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawCommon {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub repeatmin: String,
    pub repeatmax: String,
    pub fillcolor: String,
    pub strokecolor: String,
    #[serde(alias = "extends")]
    pub derives: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RawElement {
    Structure(RawStructure),
    Number(RawNumber),
    String(RawString),
    Binary(RawBinary),
    Offset(RawOffset),
    StructRef(RawStructRef),
    GrammarRef(RawGrammarRef),
    Custom(RawCustom),
    Script(RawScriptElement),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawStructure {
    #[serde(flatten)]
    pub common: RawCommon,
    pub length: String,
    pub lengthoffset: String,
    pub lengthunit: String,
    pub endian: String,
    pub signed: String,
    pub encoding: String,
    pub order: String,
    pub display: String,
    pub elements: Vec<RawElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawNumber {
    #[serde(flatten)]
    pub common: RawCommon,
    #[serde(rename = "type")]
    pub number_type: String,
    pub length: String,
    pub lengthunit: String,
    pub endian: String,
    pub signed: String,
    pub display: String,
    pub mustmatch: String,
    pub values: Vec<RawFixedValue>,
    pub masks: Vec<RawMask>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawFixedValue {
    pub name: String,
    pub value: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawMask {
    pub name: String,
    pub value: String,
    pub description: String,
    pub values: Vec<RawFixedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawString {
    #[serde(flatten)]
    pub common: RawCommon,
    /// `zero-terminated`, `fixed-length`, `pascal` or `delimiter-terminated`.
    #[serde(rename = "type")]
    pub string_type: String,
    pub length: String,
    pub lengthunit: String,
    pub encoding: String,
    /// One byte in hex, `0x` prefix optional.
    pub delimiter: String,
    pub mustmatch: String,
    pub values: Vec<RawFixedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawBinary {
    #[serde(flatten)]
    pub common: RawCommon,
    pub length: String,
    pub lengthunit: String,
    pub mustmatch: String,
    /// Fixed values are hex byte strings.
    pub values: Vec<RawFixedValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawOffset {
    #[serde(flatten)]
    pub common: RawCommon,
    pub length: String,
    pub lengthunit: String,
    pub endian: String,
    pub display: String,
    pub relative_to: String,
    pub references: String,
    pub referenced_size: String,
    pub follow_null_reference: String,
    pub additional: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawStructRef {
    #[serde(flatten)]
    pub common: RawCommon,
    pub structure: String,
    pub disabled: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawGrammarRef {
    #[serde(flatten)]
    pub common: RawCommon,
    pub grammar: String,
    pub uti: String,
    pub filename: String,
    pub disabled: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawCustom {
    #[serde(flatten)]
    pub common: RawCommon,
    pub length: String,
    pub lengthunit: String,
    /// Script name.
    pub script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawScriptElement {
    #[serde(flatten)]
    pub common: RawCommon,
    pub script: RawScript,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawScript {
    pub name: String,
    #[serde(rename = "type")]
    pub script_type: String,
    pub language: String,
    pub text: String,
    pub source: Option<RawScriptSource>,
}

/// Script body held in a nested record; its language wins over the script's.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawScriptSource {
    pub language: String,
    pub text: String,
}
