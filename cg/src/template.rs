//! Template store and the tag manager wire model
//!
//! Base shapes are held in immutable template types. The only way to get a
//! mutable value out of a template is `instantiate()`, which returns an owned
//! deep copy, so expansion can never write through to the shared base.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prefix of every generated trigger name
pub const TRIGGER_NAME_PREFIX: &str = "Evidon Consent Blocking";

/// Default name of the data-layer variable holding the consent categories
pub const DEFAULT_VARIABLE_NAME: &str = "MPX - DLV - consentCategories";

/// Default data-layer key read by the consent variable
pub const DEFAULT_DATA_LAYER_KEY: &str = "consentCategories";

/// Variable type tag for data-layer variables
pub const DATA_LAYER_VARIABLE: &str = "v";

/// Reference syntax other entities use to read a variable
pub fn variable_reference(name: &str) -> String {
    format!("{{{{{}}}}}", name)
}

/// Typed parameter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Template,
    Boolean,
    Integer,
}

/// A single typed key/value parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn template(key: &str, value: impl Into<String>) -> Self {
        Self {
            kind: ParameterType::Template,
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn boolean(key: &str, value: bool) -> Self {
        Self {
            kind: ParameterType::Boolean,
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn integer(key: &str, value: i64) -> Self {
        Self {
            kind: ParameterType::Integer,
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Match operators usable in a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    MatchRegex,
    Equals,
    Contains,
}

/// One filter clause: an operator over named arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub parameter: Vec<Parameter>,
}

impl Condition {
    /// Look up an argument by key
    pub fn argument(&self, key: &str) -> Option<&Parameter> {
        self.parameter.iter().find(|p| p.key == key)
    }

    /// Overwrite an argument's value, returns false when the key is absent
    pub fn set_argument(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.parameter.iter_mut().find(|p| p.key == key) {
            Some(param) => {
                param.value = value.into();
                true
            }
            None => false,
        }
    }
}

/// Trigger kinds, in the order they are expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    FormSubmission,
    CustomEvent,
    Pageview,
    WindowLoaded,
    Click,
    DomReady,
    ElementVisibility,
    LinkClick,
    HistoryChange,
    YoutubeVideo,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 10] = [
        Self::FormSubmission,
        Self::CustomEvent,
        Self::Pageview,
        Self::WindowLoaded,
        Self::Click,
        Self::DomReady,
        Self::ElementVisibility,
        Self::LinkClick,
        Self::HistoryChange,
        Self::YoutubeVideo,
    ];

    /// Vendor identifier of the trigger type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormSubmission => "formSubmission",
            Self::CustomEvent => "customEvent",
            Self::Pageview => "pageview",
            Self::WindowLoaded => "windowLoaded",
            Self::Click => "click",
            Self::DomReady => "domReady",
            Self::ElementVisibility => "elementVisibility",
            Self::LinkClick => "linkClick",
            Self::HistoryChange => "historyChange",
            Self::YoutubeVideo => "youtubeVideo",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown trigger kind: {}", s))
    }
}

/// Consent categories, in the order they are expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentCategory {
    #[serde(rename = "analytics")]
    Analytics,
    #[serde(rename = "marketing & advertising", alias = "marketing-and-advertising")]
    MarketingAndAdvertising,
    #[serde(rename = "functional")]
    Functional,
    /// No consent signal at all
    #[serde(rename = "undefined")]
    Undefined,
}

impl ConsentCategory {
    pub const ALL: [ConsentCategory; 4] = [
        Self::Analytics,
        Self::MarketingAndAdvertising,
        Self::Functional,
        Self::Undefined,
    ];

    /// Value the data layer reports for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::MarketingAndAdvertising => "marketing & advertising",
            Self::Functional => "functional",
            Self::Undefined => "undefined",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Regex matched against the consent variable by the blocking filter
    ///
    /// Defined categories also match the catch-all `all` marker; `undefined`
    /// matches only itself.
    pub fn regex_target(&self) -> String {
        if self.is_undefined() {
            self.as_str().to_string()
        } else {
            format!("{}|all", self.as_str())
        }
    }
}

impl std::fmt::Display for ConsentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConsentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "analytics" => Ok(Self::Analytics),
            "marketing & advertising" | "marketing-and-advertising" => Ok(Self::MarketingAndAdvertising),
            "functional" => Ok(Self::Functional),
            "undefined" => Ok(Self::Undefined),
            _ => Err(format!("Unknown consent category: {}", s)),
        }
    }
}

/// A ready-to-submit data-layer variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub parameter: Vec<Parameter>,
}

/// A ready-to-submit trigger for one (kind, category) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub name: String,
    pub filter: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_event_filter: Option<Vec<Condition>>,
}

impl Trigger {
    /// Point filter clauses reading `from` at `to` instead; returns true if any changed
    pub fn retarget_variable(&mut self, from: &str, to: &str) -> bool {
        let mut changed = false;
        for clause in &mut self.filter {
            if clause.argument("arg0").is_some_and(|p| p.value == from) {
                changed |= clause.set_argument("arg0", to);
            }
        }
        changed
    }

    /// The regex target (`arg1`) of the first filter clause
    pub fn regex_target(&self) -> Option<&str> {
        self.filter
            .first()
            .and_then(|c| c.argument("arg1"))
            .map(|p| p.value.as_str())
    }
}

/// Collections a workspace holds that this tool writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Variable,
    Trigger,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable => write!(f, "variable"),
            Self::Trigger => write!(f, "trigger"),
        }
    }
}

/// Any concrete entity the writer can submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum Entity {
    Variable(Variable),
    Trigger(Trigger),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Self::Variable(v) => &v.name,
            Self::Trigger(t) => &t.name,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Variable(_) => EntityType::Variable,
            Self::Trigger(_) => EntityType::Trigger,
        }
    }

    /// Request body as sent to the vendor API
    pub fn body(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Variable(v) => serde_json::to_value(v),
            Self::Trigger(t) => serde_json::to_value(t),
        }
    }
}

impl From<Variable> for Entity {
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl From<Trigger> for Entity {
    fn from(trigger: Trigger) -> Self {
        Self::Trigger(trigger)
    }
}

/// Immutable base shape for the consent variable
#[derive(Debug, Clone)]
pub struct VariableTemplate {
    name: String,
    kind: String,
    parameter: Vec<Parameter>,
}

impl VariableTemplate {
    /// Data-layer variable reading `data_layer_key` from data layer version 2
    pub fn data_layer(name: &str, data_layer_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: DATA_LAYER_VARIABLE.to_string(),
            parameter: vec![
                Parameter::integer("dataLayerVersion", 2),
                Parameter::boolean("setDefaultValue", false),
                Parameter::template("name", data_layer_key),
            ],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference syntax used by other entities to read this variable
    pub fn reference(&self) -> String {
        variable_reference(&self.name)
    }

    /// Owned working copy
    pub fn instantiate(&self) -> Variable {
        Variable {
            name: self.name.clone(),
            kind: self.kind.clone(),
            parameter: self.parameter.clone(),
        }
    }
}

/// Immutable base shape for a blocking trigger
#[derive(Debug, Clone)]
pub struct TriggerTemplate {
    name: String,
    filter: Vec<Condition>,
}

impl TriggerTemplate {
    /// Negated case-insensitive regex match over the consent variable
    pub fn consent_blocking(variable_reference: &str) -> Self {
        Self {
            name: TRIGGER_NAME_PREFIX.to_string(),
            filter: vec![Condition {
                kind: ConditionType::MatchRegex,
                parameter: vec![
                    Parameter::template("arg0", variable_reference),
                    Parameter::template("arg1", ""),
                    Parameter::boolean("ignore_case", true),
                    Parameter::boolean("negate", true),
                ],
            }],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &[Condition] {
        &self.filter
    }

    /// Owned working copy of the given kind, not yet substituted
    pub fn instantiate(&self, kind: TriggerKind) -> Trigger {
        Trigger {
            kind,
            name: self.name.clone(),
            filter: self.filter.clone(),
            custom_event_filter: None,
        }
    }
}

/// Read-only holder of the base templates and axis enumerations
#[derive(Debug, Clone)]
pub struct TemplateStore {
    variable: VariableTemplate,
    trigger: TriggerTemplate,
    custom_event_filter: Vec<Condition>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(DEFAULT_VARIABLE_NAME, DEFAULT_DATA_LAYER_KEY)
    }
}

impl TemplateStore {
    /// Build the store around a consent variable; triggers reference it by name
    pub fn new(variable_name: &str, data_layer_key: &str) -> Self {
        debug!(%variable_name, %data_layer_key, "TemplateStore::new: called");
        let variable = VariableTemplate::data_layer(variable_name, data_layer_key);
        let trigger = TriggerTemplate::consent_blocking(&variable.reference());
        let custom_event_filter = vec![Condition {
            kind: ConditionType::MatchRegex,
            parameter: vec![
                Parameter::template("arg0", "{{_event}}"),
                Parameter::template("arg1", ".*"),
                Parameter::boolean("ignore_case", true),
            ],
        }];
        Self {
            variable,
            trigger,
            custom_event_filter,
        }
    }

    pub fn variable_template(&self) -> &VariableTemplate {
        &self.variable
    }

    pub fn trigger_template(&self) -> &TriggerTemplate {
        &self.trigger
    }

    /// Working copy of the consent variable
    pub fn variable(&self) -> Variable {
        self.variable.instantiate()
    }

    /// Working copy of the filter required on custom event triggers
    pub fn custom_event_filter(&self) -> Vec<Condition> {
        self.custom_event_filter.clone()
    }

    pub fn kinds(&self) -> &'static [TriggerKind] {
        &TriggerKind::ALL
    }

    pub fn categories(&self) -> &'static [ConsentCategory] {
        &ConsentCategory::ALL
    }
}
