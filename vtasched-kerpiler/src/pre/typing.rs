use smallvec::*;

use crate::error::{Result, ScheduleError};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum DType {
    I8,
    I16,
    I32,
    U8,
    F32,
}

impl DType {
    pub fn is_int(self) -> bool {
        !matches!(self, DType::F32)
    }
    pub fn bits(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 8,
            DType::I16 => 16,
            DType::I32 | DType::F32 => 32,
        }
    }
    // signed integer type of 2^log_width bits, as the hardware config spells widths
    pub fn int_of_log_width(log_width: u32) -> Option<DType> {
        match log_width {
            3 => Some(DType::I8),
            4 => Some(DType::I16),
            5 => Some(DType::I32),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::U8 => "uint8",
            DType::F32 => "float32",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Dim {Var(usize), Fix(usize)}

#[derive(Debug, PartialEq, Eq, Clone, Default, Hash)]
pub struct Shape(pub(crate) SmallVec<[Dim; 6]>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(SmallVec::new())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn dims(&self) -> &[Dim] {
        &self.0
    }
    // every extent, failing on the first symbolic one
    pub fn as_const(&self) -> Result<SmallVec<[usize; 6]>> {
        self.0.iter().enumerate().map(|(i, d)| match d {
            Dim::Fix(n) => Ok(*n),
            Dim::Var(v) => Err(ScheduleError::InvalidShape(format!("axis {i} is symbolic (var {v})"))),
        }).collect()
    }
    pub fn volume(&self) -> Result<usize> {
        Ok(self.as_const()?.iter().product())
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 { write!(f, ", ")?; }
            match d {
                Dim::Fix(n) => write!(f, "{n}")?,
                Dim::Var(v) => write!(f, "?{v}")?,
            }
        }
        write!(f, "]")
    }
}

pub fn sh<const N: usize>(x: [usize; N]) -> Shape {
    Shape(x.map(Dim::Fix).into_iter().collect())
}

// axis positions of the packed 6-d layout
pub mod packed {
    pub const OUTER_BATCH: usize = 0;
    pub const OUTER_CHANNEL: usize = 1;
    pub const HEIGHT: usize = 2;
    pub const WIDTH: usize = 3;
    pub const INNER_BATCH: usize = 4;
    pub const INNER_CHANNEL: usize = 5;
    pub const RANK: usize = 6;
}

/// A layout tag is packed when it blocks both batch (`n`) and channel (`c`),
/// e.g. `NCHW1n16c`. Plain `NCHW` never is.
pub fn is_packed_layout(layout: &str) -> bool {
    if layout == "NCHW" {
        return false;
    }
    layout.contains('n') && layout.contains('c')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_tags() {
        assert!(is_packed_layout("NCHW1n16c"));
        assert!(is_packed_layout("NCHW4n8c"));
        assert!(!is_packed_layout("NCHW"));
        assert!(!is_packed_layout("NHWC"));
        assert!(!is_packed_layout("NCHW16c"));
    }

    #[test]
    fn symbolic_dims_are_not_const() {
        let s = Shape(smallvec![Dim::Fix(2), Dim::Var(0)]);
        assert!(matches!(s.as_const(), Err(ScheduleError::InvalidShape(_))));
        assert_eq!(sh([2, 3, 4]).volume(), Ok(24));
        assert_eq!(Shape::scalar().volume(), Ok(1));
        assert_eq!(sh([1, 16]).to_string(), "[1, 16]");
    }

    #[test]
    fn log_widths() {
        assert_eq!(DType::int_of_log_width(3), Some(DType::I8));
        assert_eq!(DType::int_of_log_width(5), Some(DType::I32));
        assert_eq!(DType::int_of_log_width(7), None);
        assert!(!DType::F32.is_int());
        assert_eq!(DType::I32.bits(), 32);
    }
}
