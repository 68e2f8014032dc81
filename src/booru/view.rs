/// The widget presenting an image list. Only ever sees indices.
pub trait ListView {
    /// Makes room for `count` entries.
    fn reserve(&mut self, count: usize);

    fn set_selected(&mut self, index: usize);

    fn clear(&mut self);
}

/// A view that ignores every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl ListView for NullView {
    fn reserve(&mut self, _count: usize) {}

    fn set_selected(&mut self, _index: usize) {}

    fn clear(&mut self) {}
}
