use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::parse_number;
use crate::codec::{
    DEFAULT_W, SetLines, config_lines, delete_line, join_id, match_prefix, quote, show_relative,
    trim_quotes,
};
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorKind, JunosError};
use crate::lifecycle::ResourceOperations;
use crate::session::Session;

/// `junos_vlan`: a bridging domain under `vlans`, optionally inside a
/// routing instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Vlan {
    /// `<name>_-_<routing_instance>` once the vlan exists.
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_instance")]
    pub routing_instance: String,
    pub description: Option<String>,
    /// Single id, or `none`/`all`.
    pub vlan_id: Option<String>,
    #[serde(default)]
    pub vlan_id_list: Vec<String>,
    pub l3_interface: Option<String>,
    #[serde(default)]
    pub community_vlans: Vec<String>,
    pub isolated_vlan: Option<String>,
    /// `community` or `isolated`.
    pub private_vlan: Option<String>,
    pub service_id: Option<u32>,
    pub forward_filter_input: Option<String>,
    pub forward_filter_output: Option<String>,
    pub vxlan: Option<VlanVxlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VlanVxlan {
    pub vni: u32,
    #[serde(default)]
    pub ingress_node_replication: bool,
    pub multicast_group: Option<String>,
    #[serde(default)]
    pub encapsulate_inner_vlan: bool,
    #[serde(default)]
    pub ovsdb_managed: bool,
    pub unreachable_vtep_aging_timer: Option<u32>,
}

fn default_instance() -> String {
    DEFAULT_W.to_string()
}

impl Default for Vlan {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            routing_instance: default_instance(),
            description: None,
            vlan_id: None,
            vlan_id_list: Vec::new(),
            l3_interface: None,
            community_vlans: Vec::new(),
            isolated_vlan: None,
            private_vlan: None,
            service_id: None,
            forward_filter_input: None,
            forward_filter_output: None,
            vxlan: None,
        }
    }
}

impl Vlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn in_instance(mut self, routing_instance: impl Into<String>) -> Self {
        self.routing_instance = routing_instance.into();
        self
    }

    fn instance(&self) -> &str {
        if self.routing_instance.is_empty() {
            DEFAULT_W
        } else {
            &self.routing_instance
        }
    }

    fn in_default_instance(&self) -> bool {
        self.instance() == DEFAULT_W
    }

    /// Hierarchy path of the vlan stanza.
    pub fn path(&self) -> String {
        if self.in_default_instance() {
            format!("vlans {}", self.name)
        } else {
            format!(
                "routing-instances {} vlans {}",
                self.routing_instance, self.name
            )
        }
    }

    fn where_is(&self) -> String {
        if self.in_default_instance() {
            format!("vlan {}", self.name)
        } else {
            format!(
                "vlan {} in routing-instance {}",
                self.name, self.routing_instance
            )
        }
    }

    /// `set` lines for the whole stanza.
    pub fn set_lines(&self) -> Result<Vec<String>, JunosError> {
        if self.name.is_empty() {
            return Err(JunosError::config_apply("vlan name is empty").with_path("name"));
        }
        if self.vlan_id.is_some() && !self.vlan_id_list.is_empty() {
            return Err(
                JunosError::config_apply("only one of vlan_id or vlan_id_list can be set")
                    .with_path("vlan_id_list"),
            );
        }
        if let Some(private) = &self.private_vlan
            && private != "community"
            && private != "isolated"
        {
            return Err(JunosError::config_apply(format!(
                "private_vlan must be community or isolated, got '{private}'"
            ))
            .with_path("private_vlan"));
        }

        let mut set = SetLines::new(self.path());
        if let Some(description) = &self.description {
            set.push(format!("description {}", quote(description)));
        }
        if let Some(vlan_id) = &self.vlan_id {
            set.push(format!("vlan-id {vlan_id}"));
        }
        for id in &self.vlan_id_list {
            set.push(format!("vlan-id-list {id}"));
        }
        if let Some(l3) = &self.l3_interface {
            set.push(format!("l3-interface {l3}"));
        }
        for community in &self.community_vlans {
            set.push(format!("community-vlans {community}"));
        }
        if let Some(isolated) = &self.isolated_vlan {
            set.push(format!("isolated-vlan {isolated}"));
        }
        if let Some(private) = &self.private_vlan {
            set.push(format!("private-vlan {private}"));
        }
        if let Some(service_id) = self.service_id {
            set.push(format!("service-id {service_id}"));
        }
        if let Some(filter) = &self.forward_filter_input {
            set.push(format!("forwarding-options filter input {filter}"));
        }
        if let Some(filter) = &self.forward_filter_output {
            set.push(format!("forwarding-options filter output {filter}"));
        }
        if let Some(vxlan) = &self.vxlan {
            set.push(format!("vxlan vni {}", vxlan.vni));
            if vxlan.ingress_node_replication {
                set.push("vxlan ingress-node-replication");
            }
            if let Some(group) = &vxlan.multicast_group {
                set.push(format!("vxlan multicast-group {group}"));
            }
            if vxlan.encapsulate_inner_vlan {
                set.push("vxlan encapsulate-inner-vlan");
            }
            if vxlan.ovsdb_managed {
                set.push("vxlan ovsdb-managed");
            }
            if let Some(timer) = vxlan.unreachable_vtep_aging_timer {
                set.push(format!("vxlan unreachable-vtep-aging-timer {timer}"));
            }
        }
        if set.is_empty() {
            set.push_bare();
        }
        Ok(set.into_lines())
    }

    /// Fills the option fields from `display set relative` output.
    fn read_lines(&mut self, output: &str) -> Result<(), JunosError> {
        const PREFIXES: &[&str] = &[
            "description ",
            "vlan-id ",
            "vlan-id-list ",
            "l3-interface ",
            "community-vlans ",
            "isolated-vlan ",
            "private-vlan ",
            "service-id ",
            "forwarding-options filter input ",
            "forwarding-options filter output ",
            "vxlan ",
        ];
        for line in config_lines(output) {
            let Some((prefix, value)) = match_prefix(line, PREFIXES) else {
                continue;
            };
            match prefix {
                "description " => self.description = Some(trim_quotes(value)),
                "vlan-id " => self.vlan_id = Some(value.to_string()),
                "vlan-id-list " => self.vlan_id_list.push(value.to_string()),
                "l3-interface " => self.l3_interface = Some(value.to_string()),
                "community-vlans " => self.community_vlans.push(value.to_string()),
                "isolated-vlan " => self.isolated_vlan = Some(value.to_string()),
                "private-vlan " => self.private_vlan = Some(value.to_string()),
                "service-id " => self.service_id = Some(parse_number("service_id", value)?),
                "forwarding-options filter input " => {
                    self.forward_filter_input = Some(value.to_string())
                }
                "forwarding-options filter output " => {
                    self.forward_filter_output = Some(value.to_string())
                }
                _ => self
                    .vxlan
                    .get_or_insert_with(VlanVxlan::default)
                    .read_line(value)?,
            }
        }
        Ok(())
    }
}

impl VlanVxlan {
    fn read_line(&mut self, line: &str) -> Result<(), JunosError> {
        match line {
            "ingress-node-replication" => self.ingress_node_replication = true,
            "encapsulate-inner-vlan" => self.encapsulate_inner_vlan = true,
            "ovsdb-managed" => self.ovsdb_managed = true,
            _ => match match_prefix(
                line,
                &["vni ", "multicast-group ", "unreachable-vtep-aging-timer "],
            ) {
                Some(("vni ", value)) => self.vni = parse_number("vxlan.vni", value)?,
                Some(("multicast-group ", value)) => {
                    self.multicast_group = Some(value.to_string())
                }
                Some((_, value)) => {
                    self.unreachable_vtep_aging_timer =
                        Some(parse_number("vxlan.unreachable_vtep_aging_timer", value)?)
                }
                None => {}
            },
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceOperations for Vlan {
    fn type_name(&self) -> &'static str {
        "junos_vlan"
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn fill_id(&mut self) {
        self.id = Some(join_id(&self.identity_fields()));
    }

    fn clear_id(&mut self) {
        self.id = None;
    }

    fn identity_fields(&self) -> Vec<String> {
        vec![self.name.clone(), self.instance().to_string()]
    }

    fn import_field_count(&self) -> (usize, usize) {
        (1, 2)
    }

    async fn set(&self, session: &mut Session) -> Result<(), JunosError> {
        let lines = self.set_lines()?;
        session.config_set(&lines).await
    }

    async fn del(&self, session: &mut Session) -> Result<(), JunosError> {
        session.config_set(&[delete_line(&self.path())]).await
    }

    async fn read(&mut self, fields: &[String], session: &mut Session) -> Result<bool, JunosError> {
        let name = fields.first().cloned().unwrap_or_default();
        let routing_instance = fields.get(1).cloned().unwrap_or_else(default_instance);
        *self = Vlan {
            name,
            routing_instance,
            ..Vlan::default()
        };

        let output = session.command(&show_relative(&self.path())).await?;
        if config_lines(&output).next().is_none() {
            return Ok(false);
        }
        self.read_lines(&output)?;
        Ok(true)
    }

    async fn pre_check_create(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        if !check_instance(self, session, diags).await {
            return false;
        }
        match session.config_exists(&self.path()).await {
            Ok(false) => true,
            Ok(true) => {
                diags.add_error(
                    ErrorKind::PreCheck,
                    "Duplicate Configuration Error",
                    format!("{} already exists", self.where_is()),
                );
                false
            }
            Err(err) => {
                diags.push_error(&err);
                false
            }
        }
    }

    async fn post_check_create(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        match session.config_exists(&self.path()).await {
            Ok(true) => true,
            Ok(false) => {
                diags.add_error(
                    ErrorKind::PostCheck,
                    "Not Found Error",
                    format!(
                        "{} does not exists after commit => check your config",
                        self.where_is()
                    ),
                );
                false
            }
            Err(err) => {
                diags.push_error(&err);
                false
            }
        }
    }

    async fn pre_check_update(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        check_instance(self, session, diags).await
    }
}

/// A non-default routing instance must already be configured.
async fn check_instance(vlan: &Vlan, session: &mut Session, diags: &mut Diagnostics) -> bool {
    if vlan.in_default_instance() {
        return true;
    }
    let path = format!("routing-instances {}", vlan.routing_instance);
    match session.config_exists(&path).await {
        Ok(true) => true,
        Ok(false) => {
            diags.add_attribute_error(
                "routing_instance",
                ErrorKind::PreCheck,
                "Missing Configuration Error",
                format!("routing instance {} doesn't exist", vlan.routing_instance),
            );
            false
        }
        Err(err) => {
            diags.push_error(&err);
            false
        }
    }
}
