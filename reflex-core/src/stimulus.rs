/// Shapes a visual handle can stand for when the host rasterizes its own
/// stimuli. The engine itself never looks inside.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle {
        radius: f32,
        color: [u8; 4],
    },
    Rectangle {
        width: f32,
        height: f32,
        color: [u8; 4],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        color: [u8; 4],
    },
    Fixation {
        size: f32,
        color: [u8; 4],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowDirection {
    Up,
    Down,
    Left,
    Right,
}

impl Shape {
    /// Pixel extent of the shape's bounding box.
    pub fn extent(&self) -> (u32, u32) {
        match self {
            Shape::Circle { radius, .. } => {
                let size = (radius * 2.0).ceil() as u32;
                (size, size)
            }
            Shape::Rectangle { width, height, .. } => (width.ceil() as u32, height.ceil() as u32),
            Shape::Arrow { size, .. } => {
                let size = (size * 2.0).ceil() as u32;
                (size, size)
            }
            Shape::Fixation { size, .. } => (size.ceil() as u32, size.ceil() as u32),
        }
    }

    pub fn color(&self) -> [u8; 4] {
        match self {
            Shape::Circle { color, .. }
            | Shape::Rectangle { color, .. }
            | Shape::Arrow { color, .. }
            | Shape::Fixation { color, .. } => *color,
        }
    }
}
