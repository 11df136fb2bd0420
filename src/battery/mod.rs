pub mod controller;
pub mod engine;
pub mod forecast;
pub mod grid_charge;
pub mod prices;
pub mod rate;
pub mod status;
