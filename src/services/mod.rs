/// Answer submission and score refresh.
pub mod answer_service;
/// Question set authoring.
pub mod authoring_service;
/// Rows loaded for a session operation, plus ownership and token checks.
pub mod context;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Pause, resume, lock and leaderboard transitions of the current question.
pub mod phase_service;
/// Player join, removal, roster and leaderboard.
pub mod roster_service;
/// Session creation, start, advance and early end.
pub mod session_service;
/// Server-Sent Events streaming per role.
pub mod sse_service;
/// Storage connection supervisor and degraded mode.
pub mod storage_supervisor;
/// Snapshot reads and the per-session change pump.
pub mod sync_service;
/// Expiry watchers that lock questions once their stored end passed.
pub mod timer_service;
