pub mod ai;
pub mod calendar;
pub mod conversation;
pub mod dedup;
pub mod planner;
pub mod reply;
pub mod scheduling;
pub mod sessions;
pub mod time;
