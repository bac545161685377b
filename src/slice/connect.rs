use super::subscription::{Slice, SliceSubscription};
use crate::store::{shallow_merge, Store};
use crate::value::Record;

/// Properties passed to a component.
pub type Props = Record;

/// The seam to the host UI framework: something that renders from props.
pub trait Component {
    type Output;

    fn render(&self, props: &Props) -> Self::Output;
}

impl<F, O> Component for F
where
    F: Fn(&Props) -> O,
{
    type Output = O;

    fn render(&self, props: &Props) -> O {
        self(props)
    }
}

/// A component rendered with a live store slice merged under its own props.
///
/// On a key collision the component's own props win.
pub struct Connected<C> {
    component: C,
    subscription: SliceSubscription,
}

impl<C: Component> Connected<C> {
    pub fn new<I, S>(store: &Store, names: I, component: C) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            component,
            subscription: SliceSubscription::new(store, names),
        }
    }

    /// Like [`new`](Self::new), with `rerender` called after each slice
    /// change.
    pub fn with_listener<I, S, F>(store: &Store, names: I, component: C, rerender: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Slice) + Send + Sync + 'static,
    {
        Self {
            component,
            subscription: SliceSubscription::with_listener(store, names, rerender),
        }
    }

    /// The props the inner component receives for `own`.
    pub fn props(&self, own: &Props) -> Props {
        self.subscription
            .with(|slice| shallow_merge(slice, own.clone()))
    }

    pub fn subscription(&self) -> &SliceSubscription {
        &self.subscription
    }

    pub fn inner(&self) -> &C {
        &self.component
    }

    /// Unregister from the store and hand back the wrapped component.
    pub fn into_inner(self) -> C {
        self.subscription.deactivate();
        self.component
    }
}

impl<C: Component> Component for Connected<C> {
    type Output = C::Output;

    fn render(&self, props: &Props) -> Self::Output {
        self.component.render(&self.props(props))
    }
}

/// Wrapper-style entry point: `component` rendered with the `names` slice of
/// `store` merged under its own props.
pub fn wrap_with_slice<C, I, S>(store: &Store, names: I, component: C) -> Connected<C>
where
    C: Component,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Connected::new(store, names, component)
}
