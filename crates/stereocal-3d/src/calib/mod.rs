mod dataset;
pub use dataset::*;

mod epipolar;
pub use epipolar::*;

mod extrinsics;
pub use extrinsics::*;

mod intrinsics;
pub use intrinsics::*;

mod problem;

mod projection;
pub use projection::*;

mod stereo;
pub use stereo::*;

mod target;
pub use target::*;
