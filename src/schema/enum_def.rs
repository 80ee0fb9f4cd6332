use diesel_derive_enum::DbEnum;
use serde::{Serialize, Deserialize};
use strum::{Display, EnumString};

/// Wire flavor of a completion backend. All three speak the OpenAI chat API;
/// they differ in how the base URL is written down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default, Display, EnumString)]
#[db_enum(pg_type = "provider_type_enum")]
#[db_enum(value_style = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ProviderType {
    /// Self-hosted vLLM server.
    Vllm,
    /// Any other OpenAI-API-compatible server.
    #[default]
    OpenaiCompatible,
    /// Hosted OpenAI-compatible endpoint, used exactly as configured.
    Openai,
}

/// What a model or prompt template is meant for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, Default, Display, EnumString)]
#[db_enum(pg_type = "purpose_enum")]
#[db_enum(value_style = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Purpose {
    Sql,
    Explanation,
    Optimization,
    #[default]
    General,
}

impl Purpose {
    /// A candidate tagged `General` serves every purpose.
    pub fn serves(&self, wanted: Purpose) -> bool {
        *self == wanted || *self == Purpose::General
    }
}
