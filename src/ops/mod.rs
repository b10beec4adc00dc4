pub mod apply;
pub mod blend;
pub mod combine;
pub mod region;
