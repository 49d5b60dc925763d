use thiserror::Error;

/// Ошибки транспортного уровня SNMP сессии.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no authentication mechanism specified")]
    NoAuthentication,

    #[error("SNMP version not supported: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported authentication protocol: {0}")]
    UnsupportedAuthProtocol(String),

    #[error("unsupported privacy protocol: {0}")]
    UnsupportedPrivacyProtocol(String),

    #[error("invalid oid `{0}`")]
    InvalidOid(String),

    #[error("request timed out after {retries} retries")]
    Timeout { retries: u32 },

    #[error("{0}")]
    Transport(String),

    #[error("session is closed")]
    Closed,
}

/// Ошибки приведения и пост-обработки значений.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("value for Scalar OID `{0}` not found in results")]
    ScalarNotFound(String),

    #[error("value for Column OID `{0}` not found in results")]
    ColumnNotFound(String),

    #[error("value for Column OID `{oid}`, index `{index}` not found in results")]
    ColumnIndexNotFound { oid: String, index: String },

    #[error("oid `{oid}`: invalid value type `{kind}`")]
    UnsupportedPdu { oid: String, kind: &'static str },

    #[error("failed to parse `{0}` as float")]
    NotANumber(String),

    #[error(
        "extract value extractValuePattern does not match (extractValuePattern={pattern}, srcValue={value})"
    )]
    ExtractNoMatch { pattern: String, value: String },

    #[error(
        "extract value pattern des not contain any matching group (extractValuePattern={pattern}, srcValue={value})"
    )]
    ExtractNoGroup { pattern: String, value: String },

    #[error("match pattern `{pattern}` does not match string `{value}`")]
    MatchFailed { pattern: String, value: String },

    #[error(
        "the pattern `{pattern}` matched value `{value}`, but template `{template}` is not compatible"
    )]
    TemplateIncompatible {
        pattern: String,
        value: String,
        template: String,
    },

    #[error("unknown format `{format}` (value type `{kind}`)")]
    UnknownFormat { format: String, kind: &'static str },

    #[error("value type `{kind}` not supported (format `{format}`)")]
    FormatUnsupported { format: String, kind: &'static str },

    #[error("flag stream index `{index}` not found in `{value}`")]
    FlagStreamIndex { index: usize, value: String },

    #[error("cannot evaluate memory usage, total memory is 0")]
    ZeroTotalMemory,
}

/// Ошибки конфигурации, обнаруживаемые при старте.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`snmp_version` must be 1 or 2 or 3")]
    InvalidVersion,

    #[error("invalid CIDR `{value}`: {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid IP address `{0}`")]
    InvalidIp(String),

    #[error("invalid duration `{0}`")]
    InvalidDuration(String),

    #[error("either a table symbol or a scalar symbol must be provided")]
    MissingSymbol,

    #[error("table symbol and scalar symbol cannot be both provided")]
    BothSymbols,

    #[error("column symbols doesn't have a 'metric_tags' section ({0}), all its metrics will use the same tags")]
    MissingMetricTags(String),

    #[error("symbol name missing: name=`{name}` oid=`{oid}`")]
    SymbolNameMissing { name: String, oid: String },

    #[error("symbol oid missing: name=`{name}` oid=`{oid}`")]
    SymbolOidMissing { name: String, oid: String },

    #[error("cannot compile `{field}` (`{pattern}`): {source}")]
    Regex {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("`tags` mapping must be provided if `match` (`{0}`) is defined")]
    MatchWithoutTags(String),

    #[error("transform rule end should be greater than start. Invalid rule: {start}-{end}")]
    InvalidTransform { start: u32, end: u32 },

    #[error("validation errors: {0}")]
    Validation(String),
}

/// Задание не поставлено в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("collector stopped")]
    Stopped,

    #[error("process is exiting")]
    Exiting,

    #[error("job queue is closed")]
    QueueClosed,
}
