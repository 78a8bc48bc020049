pub mod check;
pub mod rollout;
