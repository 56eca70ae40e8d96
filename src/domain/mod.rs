pub mod engagement;
pub mod notification;
pub mod social_graph;
