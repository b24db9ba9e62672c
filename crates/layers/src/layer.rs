use foundation::ids::{FeatureId, LayerId};
use runtime::event_bus::{EventBus, Sequenced, Subscription};

use crate::style::{Style, StyleOptions};

pub trait Layer {
    fn id(&self) -> LayerId;
}

/// Layer properties whose change is announced through [`LayerEvent::PropertyChange`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LayerProperty {
    Style,
    LabelVisibility,
    Title,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerEvent {
    Visibility(bool),
    Opacity(f32),
    PropertyChange {
        property: LayerProperty,
        /// Affected features, or `None` for all of them.
        features: Option<Vec<FeatureId>>,
    },
}

#[derive(Debug)]
pub struct VectorLayer {
    id: LayerId,
    title: String,
    visible: bool,
    opacity: f32,
    labels_visible: bool,
    default_style: Style,
    events: EventBus<LayerEvent>,
}

impl VectorLayer {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id: LayerId(id),
            title: title.into(),
            visible: true,
            opacity: 1.0,
            labels_visible: true,
            default_style: Style::default(),
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        self.events.unsubscribe(sub)
    }

    pub fn drain_events(&mut self, sub: Subscription) -> Vec<LayerEvent> {
        self.events.drain(sub)
    }

    /// Events with their emission stamps, for merging with other buses.
    pub fn drain_sequenced_events(&mut self, sub: Subscription) -> Vec<Sequenced<LayerEvent>> {
        self.events.drain_sequenced(sub)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.events.emit(LayerEvent::PropertyChange {
            property: LayerProperty::Title,
            features: None,
        });
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        self.events.emit(LayerEvent::Visibility(visible));
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if self.opacity == opacity {
            return;
        }
        self.opacity = opacity;
        self.events.emit(LayerEvent::Opacity(opacity));
    }

    pub fn labels_visible(&self) -> bool {
        self.labels_visible
    }

    pub fn set_labels_visible(&mut self, visible: bool) {
        if self.labels_visible == visible {
            return;
        }
        self.labels_visible = visible;
        self.events.emit(LayerEvent::PropertyChange {
            property: LayerProperty::LabelVisibility,
            features: None,
        });
    }

    pub fn default_style(&self) -> &Style {
        &self.default_style
    }

    pub fn set_default_style(&mut self, style: Style) {
        self.default_style = style;
        self.notify_style_changed(None);
    }

    /// Announces that the style of `features` (or all features) changed.
    pub fn notify_style_changed(&mut self, features: Option<Vec<FeatureId>>) {
        self.events.emit(LayerEvent::PropertyChange {
            property: LayerProperty::Style,
            features,
        });
    }

    pub fn style_options(&self) -> StyleOptions {
        StyleOptions {
            opacity: self.opacity,
            labels_visible: self.labels_visible,
            highlight: None,
        }
    }
}

impl Layer for VectorLayer {
    fn id(&self) -> LayerId {
        self.id
    }
}
