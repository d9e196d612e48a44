/// Primitive number types whose alignment is at least 4 bytes.
///
/// Receive buffers are made of these so that `f32` and `u32` payloads can be viewed
/// in place after the frame header.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
