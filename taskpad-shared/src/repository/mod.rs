/// Data access for the `tasks` collection
pub mod task_repository;

pub use task_repository::TaskRepository;
