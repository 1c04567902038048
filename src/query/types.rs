use serde::{Deserialize, Serialize};
use serde_json::Value;

// Safety limits to prevent resource abuse
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_SELECT_FIELDS: usize = 64;
pub(crate) const MAX_NESTING_DEPTH: usize = 32;
pub(crate) const MAX_PATCH_FIELDS: usize = 128;
pub(crate) const MAX_REGEX_LEN: usize = 512;
pub const MAX_LIMIT: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// The comparison/test applied by one [`QueryCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    All,
    Exists,
    Regex,
    Size,
    Mod,
    Type,
}

impl QueryOp {
    pub(crate) fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$all" => Self::All,
            "$exists" => Self::Exists,
            "$regex" => Self::Regex,
            "$size" => Self::Size,
            "$mod" => Self::Mod,
            "$type" => Self::Type,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::All => "$all",
            Self::Exists => "$exists",
            Self::Regex => "$regex",
            Self::Size => "$size",
            Self::Mod => "$mod",
            Self::Type => "$type",
        }
    }
}

/// One `field / operator / operand` triple produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    pub field: String,
    pub operator: QueryOp,
    pub value: Value,
}

/// The structured form of one DSL query envelope.
///
/// `$and`/`$or`/`$not` groups are flattened into the implicit-AND
/// `conditions` list; see `parse_where`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub conditions: Vec<QueryCondition>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub select: Option<Vec<String>>,
    pub distinct: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Create,
    Update,
    Delete,
}

/// One slot of a bulk batch. Each operation runs as its own independent
/// write; there is no batch-level transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub collection: String,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOpResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkOpResult>,
}
