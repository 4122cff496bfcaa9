pub mod approval;
pub mod live;
pub mod mutation;
pub mod notification;
pub mod patch;
