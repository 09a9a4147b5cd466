//! Subscription menu: a read-only view of the registry for picking a shader.
//!
//! Rendering is the host's business; this module only builds the entries and
//! performs the selection.

use crate::library::{ModuleId, ShaderLibrary, Subscription};

pub const EMPTY_MENU_LABEL: &str = "No Glib modules available";

/// Anything that can follow a published shader.
pub trait ShaderSubscriber {
    fn subscriber_id(&self) -> ModuleId;
    /// Called after the registry stored the new subscription.
    fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub index: i32,
    pub name: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherMenu {
    pub publisher_id: ModuleId,
    pub label: String,
    pub entries: Vec<MenuEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderMenu {
    Empty,
    Publishers(Vec<PublisherMenu>),
}

impl ShaderMenu {
    /// Flattened `(publisher, index, name)` list in display order.
    pub fn choices(&self) -> Vec<(ModuleId, i32, String)> {
        match self {
            ShaderMenu::Empty => Vec::new(),
            ShaderMenu::Publishers(groups) => groups
                .iter()
                .flat_map(|g| g.entries.iter().map(|e| (g.publisher_id, e.index, e.name.clone())))
                .collect(),
        }
    }

    /// Plain-text rendering, one line per row.
    pub fn lines(&self) -> Vec<String> {
        match self {
            ShaderMenu::Empty => vec![EMPTY_MENU_LABEL.to_string()],
            ShaderMenu::Publishers(groups) => {
                let mut out = Vec::new();
                for g in groups {
                    out.push(g.label.clone());
                    for e in &g.entries {
                        let mark = if e.checked { "✔" } else { " " };
                        out.push(format!("  {mark} {}", e.name));
                    }
                }
                out
            }
        }
    }
}

pub fn build_menu(library: &ShaderLibrary, subscriber: ModuleId) -> ShaderMenu {
    let current = library.subscription(subscriber);
    let groups: Vec<PublisherMenu> = library
        .publisher_ids()
        .into_iter()
        .filter_map(|publisher_id| {
            let shaders = library.shaders_for_publisher(publisher_id)?;
            let entries = shaders
                .iter()
                .enumerate()
                .map(|(i, pair)| MenuEntry {
                    index: i as i32,
                    name: pair.name.clone(),
                    checked: matches!(
                        current,
                        Some(Subscription { publisher_id: p, shader_index: s, .. })
                            if p == publisher_id && s == i as i32
                    ),
                })
                .collect();
            Some(PublisherMenu {
                publisher_id,
                label: format!("Glib {publisher_id} ({} shaders)", shaders.len()),
                entries,
            })
        })
        .collect();

    if groups.is_empty() {
        ShaderMenu::Empty
    } else {
        ShaderMenu::Publishers(groups)
    }
}

/// Subscribe `subscriber` to `publisher[index]` and notify it.
pub fn select_shader<S: ShaderSubscriber + ?Sized>(
    library: &ShaderLibrary,
    subscriber: &mut S,
    publisher: ModuleId,
    index: i32,
) -> Subscription {
    let sub = library.subscribe(subscriber.subscriber_id(), publisher, index);
    subscriber.on_shader_subscribe(publisher, index);
    sub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ShaderPair;

    struct Probe {
        id: ModuleId,
        calls: Vec<(ModuleId, i32)>,
    }

    impl ShaderSubscriber for Probe {
        fn subscriber_id(&self) -> ModuleId {
            self.id
        }
        fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32) {
            self.calls.push((publisher, index));
        }
    }

    #[test]
    fn empty_registry_gives_placeholder() {
        let lib = ShaderLibrary::new();
        let menu = build_menu(&lib, 1);
        assert_eq!(menu, ShaderMenu::Empty);
        assert_eq!(menu.lines(), vec![EMPTY_MENU_LABEL.to_string()]);
    }

    #[test]
    fn menu_lists_publishers_and_checks_current() {
        let lib = ShaderLibrary::new();
        lib.register_publisher(42);
        lib.add_shader(42, ShaderPair::new("plasma", "v", "f")).unwrap();
        lib.add_shader(42, ShaderPair::new("rings", "v", "f")).unwrap();
        lib.register_publisher(7);

        let mut probe = Probe { id: 1, calls: Vec::new() };
        select_shader(&lib, &mut probe, 42, 1);
        assert_eq!(probe.calls, vec![(42, 1)]);

        let ShaderMenu::Publishers(groups) = build_menu(&lib, 1) else {
            panic!("expected publishers");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "Glib 7 (0 shaders)");
        assert_eq!(groups[1].label, "Glib 42 (2 shaders)");
        let checked: Vec<_> = groups[1].entries.iter().map(|e| e.checked).collect();
        assert_eq!(checked, [false, true]);

        let choices = build_menu(&lib, 1).choices();
        assert_eq!(choices[0], (42, 0, "plasma".to_string()));
    }

    #[test]
    fn invalid_selection_still_notifies() {
        let lib = ShaderLibrary::new();
        let mut probe = Probe { id: 3, calls: Vec::new() };
        let sub = select_shader(&lib, &mut probe, 999, 0);
        assert!(!sub.is_valid);
        assert_eq!(probe.calls, vec![(999, 0)]);
    }
}
