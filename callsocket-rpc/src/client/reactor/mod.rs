pub mod callback_registry;
pub mod completion_reactor;
