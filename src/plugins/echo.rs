// echo: says back whatever follows the command word

use crate::plugin::{Capabilities, Origin, Plugin, PluginInfo};
use crate::query::Query;

pub struct EchoPlugin {
    info: PluginInfo,
}

impl EchoPlugin {
    pub fn new() -> Self {
        Self {
            info: PluginInfo::new("echo", "Echo")
                .description("Repeat the text after the command")
                .example("echo hello", "prints hello"),
        }
    }
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for EchoPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only().with_invocation()
    }

    fn invocation(&self, query: &Query) -> anyhow::Result<bool> {
        Ok(query.first_token() == "echo")
    }

    fn execute(&self, query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
        let text = query.rest();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo() {
        let echo = EchoPlugin::new();
        let query = Query::new("echo  hello there ");

        assert!(echo.invocation(&query).unwrap());
        assert_eq!(
            echo.execute(&query, Origin::TopLevel).unwrap().as_deref(),
            Some("hello there")
        );
        assert_eq!(echo.execute(&Query::new("echo"), Origin::TopLevel).unwrap(), None);
        assert!(!echo.invocation(&Query::new("echoes")).unwrap());
    }
}
