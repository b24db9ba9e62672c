use foundation::color::Color;

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub src: String,
    pub scale: f32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub text: String,
    pub font: String,
    pub fill: Color,
    pub outline: Color,
    pub outline_width: f32,
}

impl Text {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: "bold 14px sans-serif".to_string(),
            fill: Color::WHITE,
            outline: Color::BLACK,
            outline_width: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub fill: Option<Color>,
    pub stroke: Option<Stroke>,
    pub icon: Option<Icon>,
    pub text: Option<Text>,
}

/// Layer-level inputs folded into every feature's style.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StyleOptions {
    pub opacity: f32,
    pub labels_visible: bool,
    /// Replaces every color (alpha kept) when the feature is highlighted.
    pub highlight: Option<Color>,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            labels_visible: true,
            highlight: None,
        }
    }
}

impl Style {
    pub fn empty() -> Self {
        Self {
            fill: None,
            stroke: None,
            icon: None,
            text: None,
        }
    }

    pub fn with_text(mut self, text: Text) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_icon(mut self, src: impl Into<String>) -> Self {
        self.icon = Some(Icon {
            src: src.into(),
            scale: 1.0,
            color: Color::WHITE,
        });
        self
    }

    /// Effective style for rendering: opacity, label visibility and highlight applied.
    pub fn resolve(&self, options: &StyleOptions) -> Style {
        let tint = |c: Color| {
            let base = match options.highlight {
                Some(h) => h.with_alpha(c.a),
                None => c,
            };
            base.fade(options.opacity)
        };

        Style {
            fill: self.fill.map(tint),
            stroke: self.stroke.as_ref().map(|s| Stroke {
                color: tint(s.color),
                width: s.width,
            }),
            icon: self.icon.as_ref().map(|i| Icon {
                src: i.src.clone(),
                scale: i.scale,
                color: tint(i.color),
            }),
            text: if options.labels_visible {
                self.text.as_ref().map(|t| Text {
                    fill: t.fill.fade(options.opacity),
                    outline: t.outline.fade(options.opacity),
                    ..t.clone()
                })
            } else {
                None
            },
        }
    }
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: Some(Color::new(1.0, 1.0, 1.0, 0.4)),
            stroke: Some(Stroke {
                color: Color::WHITE,
                width: 2.0,
            }),
            icon: Some(Icon {
                src: "builtin:circle".to_string(),
                scale: 1.0,
                color: Color::WHITE,
            }),
            text: None,
        }
    }
}
