//! Trigger expansion over the kind x category cross-product

use tracing::debug;

use crate::template::{ConsentCategory, TRIGGER_NAME_PREFIX, TemplateStore, Trigger, TriggerKind};

/// Produces concrete triggers from a template store
///
/// Expansion is pure: every call starts from fresh working copies of the
/// base template, so results can be mutated freely by the caller.
pub struct Expander<'a> {
    store: &'a TemplateStore,
    kinds: Vec<TriggerKind>,
    categories: Vec<ConsentCategory>,
}

impl<'a> Expander<'a> {
    /// Expand over every kind and category in enumeration order
    pub fn new(store: &'a TemplateStore) -> Self {
        Self {
            store,
            kinds: store.kinds().to_vec(),
            categories: store.categories().to_vec(),
        }
    }

    /// Restrict to a subset of kinds, kept in the given order
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = TriggerKind>) -> Self {
        self.kinds = dedup(kinds);
        self
    }

    /// Restrict to a subset of categories, kept in the given order
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = ConsentCategory>) -> Self {
        self.categories = dedup(categories);
        self
    }

    /// Number of triggers `expand` will produce
    pub fn len(&self) -> usize {
        self.kinds.len() * self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outer loop over kinds, inner loop over categories
    pub fn expand(&self) -> Vec<Trigger> {
        debug!(kinds = self.kinds.len(), categories = self.categories.len(), "Expander::expand: called");
        let mut triggers = Vec::with_capacity(self.len());
        for &kind in &self.kinds {
            for &category in &self.categories {
                triggers.push(self.concrete(kind, category));
            }
        }
        triggers
    }

    fn concrete(&self, kind: TriggerKind, category: ConsentCategory) -> Trigger {
        let mut trigger = self.store.trigger_template().instantiate(kind);
        trigger.name = trigger_name(kind, category);
        if let Some(clause) = trigger.filter.first_mut() {
            clause.set_argument("arg1", category.regex_target());
        }
        if kind == TriggerKind::CustomEvent {
            trigger.custom_event_filter = Some(self.store.custom_event_filter());
        }
        trigger
    }
}

fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Deterministic trigger name for a (kind, category) pair
pub fn trigger_name(kind: TriggerKind, category: ConsentCategory) -> String {
    title_case(&format!("{} - {} - {}", TRIGGER_NAME_PREFIX, kind, category))
}

/// Title-case every run of letters: first letter upper, the rest lower
///
/// A letter directly after another letter is lowercased, so camelCase
/// identifiers collapse (`customEvent` becomes `Customevent`).
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}
