pub mod abstention;
pub mod aggregate;
pub mod damping;
pub mod delta;
pub mod rubric;

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
