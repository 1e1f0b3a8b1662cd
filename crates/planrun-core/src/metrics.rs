//! Metric name constants shared across crates.

/// Registered active plans (gauge).
pub const ACTIVE_PLANS: &str = "active_plans";
/// Iterations started (counter, labels: stage).
pub const PLAN_ITERATIONS_TOTAL: &str = "plan_iterations_total";
/// Terminal outcomes handled by supervisors (counter, labels: status).
pub const PLAN_TERMINAL_TOTAL: &str = "plan_terminal_total";
/// Messages dropped because a subscriber channel was full (counter).
pub const SUBSCRIBER_DROPS_TOTAL: &str = "subscriber_drops_total";
/// Model stream requests issued (counter, labels: model).
pub const MODEL_REQUESTS_TOTAL: &str = "model_requests_total";
/// Model stream retries (counter).
pub const MODEL_RETRIES_TOTAL: &str = "model_retries_total";
/// Request token estimate per model call (histogram).
pub const REQUEST_TOKENS: &str = "request_tokens";
