mod levenberg_marquardt;
pub use levenberg_marquardt::*;
