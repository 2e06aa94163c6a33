use reflex_core::{Shape, VisualHandle};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
struct SceneItem {
    shape: Shape,
    pos: (f32, f32),
    visible: bool,
}

#[derive(Debug, Default)]
struct SceneState {
    items: Vec<SceneItem>,
    /// Bumped on every visibility change so the renderer can skip idle
    /// frames.
    revision: u64,
}

/// Shapes placed on screen, toggled by the engine through [`SceneHandle`]s.
///
/// Cloning a scene yields another view of the same items.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    state: Rc<RefCell<SceneState>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `shape` centred on `pos`, hidden until its handle is shown.
    pub fn add(&self, shape: Shape, pos: (f32, f32)) -> SceneHandle {
        let mut state = self.state.borrow_mut();
        state.items.push(SceneItem {
            shape,
            pos,
            visible: false,
        });
        SceneHandle {
            scene: self.clone(),
            index: state.items.len() - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.state.borrow().revision
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.state
            .borrow()
            .items
            .get(index)
            .is_some_and(|item| item.visible)
    }

    /// Visible items in insertion order as `(index, shape, position)`.
    pub fn visible(&self) -> Vec<(usize, Shape, (f32, f32))> {
        self.state
            .borrow()
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.visible)
            .map(|(i, item)| (i, item.shape.clone(), item.pos))
            .collect()
    }

    pub fn shape(&self, index: usize) -> Option<Shape> {
        self.state.borrow().items.get(index).map(|i| i.shape.clone())
    }

    /// Drops every item. Handles handed out earlier become inert.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.items.clear();
        state.revision += 1;
    }

    fn set_visible(&self, index: usize, visible: bool) {
        let mut state = self.state.borrow_mut();
        let changed = match state.items.get_mut(index) {
            Some(item) if item.visible != visible => {
                item.visible = visible;
                true
            }
            _ => false,
        };
        if changed {
            state.revision += 1;
        }
    }
}

/// Visibility switch for one scene item.
#[derive(Debug, Clone)]
pub struct SceneHandle {
    scene: Scene,
    index: usize,
}

impl SceneHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl VisualHandle for SceneHandle {
    fn show(&mut self) {
        self.scene.set_visible(self.index, true);
    }

    fn hide(&mut self) {
        self.scene.set_visible(self.index, false);
    }
}
