pub mod events;
pub mod nutrition_db;
pub mod pipeline;
pub mod storage;
pub mod vision;
pub mod worker;
