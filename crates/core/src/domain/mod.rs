pub mod customization;
pub mod overrides;
pub mod revenue;
pub mod template;
pub mod turn;
pub mod usage;
