//! HTTP gateway: job API, live-reload socket and preview file serving.
//!
//! ## Module Map
//!
//! ```text
//! client ──HTTP──> server.rs (build_router, start_server)
//!                    ├─ auth.rs  bearer token on /api/*
//!                    └─ api.rs   handlers, AppState, ApiError
//!                          ├─> jobs::JobSupervisor
//!                          └─> preview::BranchPublisher ──> LiveReload ──/ws──> viewers
//!
//! GitWatcher ──> debounce::run ──> AppState::publish_and_notify
//! ```
//!
//! ## Routes
//!
//! | Method | Path                               | Handler            |
//! |--------|------------------------------------|--------------------|
//! | GET    | `/health`                          | liveness           |
//! | POST   | `/api/jobs`                        | start a job        |
//! | GET    | `/api/jobs`                        | list jobs          |
//! | GET    | `/api/jobs/running`                | running job id     |
//! | GET    | `/api/jobs/{id}`                   | status             |
//! | GET    | `/api/jobs/{id}/logs`              | log tail           |
//! | GET    | `/api/jobs/{id}/output`            | full output        |
//! | POST   | `/api/jobs/{id}/stop`              | signal and cancel  |
//! | POST   | `/api/publish`                     | publish HEAD       |
//! | POST   | `/api/publish/all`                 | publish branches   |
//! | GET    | `/api/branches`                    | branch list        |
//! | POST   | `/api/branches/{name}/promote`     | merge into default |
//! | POST   | `/api/undo`                        | revert last commit |
//! | GET    | `/ws`                              | live reload        |
//! | GET    | `/preview/*`                       | published files    |
//!
//! Branch names containing `/` must be percent-encoded in the promote path.

pub mod api;
pub mod auth;
pub mod server;
