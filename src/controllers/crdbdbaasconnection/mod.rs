pub mod controller;

pub use controller::run;

mod reconcilers;
