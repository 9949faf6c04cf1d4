// Stable diagnostic codes, grouped by pipeline stage.

// Parse / annotation
pub const SYNTAX_ERROR: &str = "P0001";
pub const BAD_INDENTATION: &str = "P0002";
pub const BAD_ANNOTATION: &str = "P0101";
pub const UNKNOWN_TYPE: &str = "P0102";
pub const DUPLICATE_FIELD: &str = "P0103";
pub const ENUM_TAG_COLLISION: &str = "P0104";

// Typing
pub const TYPE_MISMATCH: &str = "P0201";
pub const UNDEFINED_NAME: &str = "P0202";
pub const ASSIGN_TO_CONST: &str = "P0203";
pub const NOT_CALLABLE: &str = "P0204";
pub const OVERLOAD_NEEDS_HINTS: &str = "P0205";
pub const UNION_FIELD_MISMATCH: &str = "P0206";
pub const BAD_ARGUMENT_COUNT: &str = "P0207";

// Linear ownership
pub const LINEAR_NOT_CONSUMED: &str = "P0301";
pub const LINEAR_INCONSISTENT_BRANCHES: &str = "P0302";
pub const LINEAR_CONSUMED_IN_LOOP: &str = "P0303";
pub const LINEAR_DANGLING_EXPR: &str = "P0304";
pub const LINEAR_ALREADY_CONSUMED: &str = "P0305";

// Control flow
pub const BREAK_OUTSIDE_LOOP: &str = "P0401";
pub const CONTINUE_OUTSIDE_LOOP: &str = "P0402";

// ABI (internal invariants)
pub const SRET_UNRESOLVED: &str = "P0501";

// External
pub const CIMPORT_NOT_FOUND: &str = "P0601";
pub const CC_FAILED: &str = "P0602";
pub const LINK_FAILED: &str = "P0603";
pub const VERIFY_FAILED: &str = "P0604";

// Effects
pub const EFFECT_UNRESOLVED: &str = "P0701";
pub const EFFECT_SUFFIX_REQUIRED: &str = "P0702";
pub const EFFECT_SEALED: &str = "P0703";
