//! `recap-scheduler` — persistent summary jobs with at-least-once delivery.
//!
//! # Overview
//!
//! Tasks live in the store's `scheduled_tasks` table. The [`Scheduler`]
//! wakes every tick, runs each task whose `next_run` has arrived, and
//! commits the task's new scheduling state together with the execution
//! record in one transaction. A crash before that commit leaves `next_run`
//! untouched, so the task is re-picked on restart; duplicate summaries are
//! tolerated by design.
//!
//! # Schedule variants
//!
//! | Variant   | Behaviour                                        |
//! |-----------|--------------------------------------------------|
//! | `Once`    | Single fire at an absolute UTC instant           |
//! | `Daily`   | Fire at HH:MM UTC every day                      |
//! | `Weekly`  | Fire at HH:MM UTC on a weekday (0 = Monday)      |
//! | `Monthly` | Fire at HH:MM UTC on a day of month (clamped)    |
//! | `Cron`    | 5-field cron expression, minute resolution       |

pub mod cron;
pub mod delivery;
pub mod engine;
pub mod schedule;

pub use delivery::Deliverer;
pub use engine::{NewTask, Scheduler};
pub use schedule::{next_run, window_for};
