use serde::{Deserialize, Serialize};

/// Default cap on concurrent executions a worker will accept, applied when
/// a registration arrives with `max_execution_limit == 0`.
pub const DEFAULT_MAX_EXECUTION_LIMIT: i32 = 10;

/// One worker registration. Key: `(application, ip:port)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Processor {
    pub application: String,
    pub node_name: String,
    pub ip: String,
    pub port: i32,
    pub status: bool,
    pub max_execution_limit: i32,
    /// Outstanding-work count, refreshed from the `Counter` at placement
    /// time — not persisted authoritatively, recomputed on read.
    #[serde(default)]
    pub undone: u64,
}

impl Processor {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// Applies the default execution limit when a worker registers without
    /// one, mirroring `RPCServer::ServNodeReg` in the original coordinator.
    pub fn normalize(&mut self) {
        if self.max_execution_limit == 0 {
            self.max_execution_limit = DEFAULT_MAX_EXECUTION_LIMIT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sets_default_limit_when_zero() {
        let mut p = Processor {
            application: "spider".into(),
            node_name: "w1".into(),
            ip: "127.0.0.1".into(),
            port: 9001,
            status: true,
            max_execution_limit: 0,
            undone: 0,
        };
        p.normalize();
        assert_eq!(p.max_execution_limit, DEFAULT_MAX_EXECUTION_LIMIT);
    }

    #[test]
    fn normalize_leaves_explicit_limit_alone() {
        let mut p = Processor {
            max_execution_limit: 42,
            ..Default::default()
        };
        p.normalize();
        assert_eq!(p.max_execution_limit, 42);
    }

    #[test]
    fn addr_formats_ip_and_port() {
        let p = Processor {
            ip: "10.0.0.1".into(),
            port: 9090,
            ..Default::default()
        };
        assert_eq!(p.addr(), "10.0.0.1:9090");
    }
}
