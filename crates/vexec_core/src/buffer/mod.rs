pub mod buffer_manager;
