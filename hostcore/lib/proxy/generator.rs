use std::{collections::HashSet, fmt::Write, path::PathBuf};

use crate::{
    config::HostcoreConfig,
    layout::HomeLayout,
    models::{PhpVersionConfig, Site},
    php::InstanceKey,
};

use super::{
    pages::{PHP_NOT_RESPONDING_PAGE, SITE_NOT_CONFIGURED_PAGE},
    Block, Caddyfile, Directive, Token,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GENERATED_HEADER: &str = "Generated by hostcore. Manual edits are overwritten.";
const MAIN_LOG_FILE: &str = "caddy-proxy.log";
const ENV_SUBSTITUTION: &str = "{$";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Renders proxy documents from the complete current state.
///
/// Holds no state between renders: the same input always yields the same text.
#[derive(Debug, Clone)]
pub struct ProxyGenerator {
    layout: HomeLayout,
    dev_mode: bool,
    admin_email: String,
    admin_listen: String,
    log_dir: PathBuf,
    proxy_log_roll_size_mb: u64,
    proxy_log_roll_keep: u32,
    instance_log_roll_size_mb: u64,
    instance_log_roll_keep: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProxyGenerator {
    /// Creates a generator.
    pub fn new(config: &HostcoreConfig) -> Self {
        Self {
            layout: config.layout(),
            dev_mode: *config.get_dev_mode(),
            admin_email: config.get_admin_email().clone(),
            admin_listen: config.get_proxy_admin_listen().clone(),
            log_dir: config.get_log_dir().clone(),
            proxy_log_roll_size_mb: *config.get_proxy_log_roll_size_mb(),
            proxy_log_roll_keep: *config.get_proxy_log_roll_keep(),
            instance_log_roll_size_mb: *config.get_instance_log_roll_size_mb(),
            instance_log_roll_keep: *config.get_instance_log_roll_keep(),
        }
    }

    /// Renders the main proxy document.
    pub fn render_main_routing(
        &self,
        sites: &[Site],
        versions: &[PhpVersionConfig],
        http_port: u16,
        https_port: u16,
    ) -> String {
        self.main_routing(sites, versions, http_port, https_port)
            .to_string()
    }

    /// Builds the main proxy document.
    ///
    /// One block per active site whose version is enabled, in site id order, then one catch-all
    /// on the HTTP port.
    pub fn main_routing(
        &self,
        sites: &[Site],
        versions: &[PhpVersionConfig],
        http_port: u16,
        https_port: u16,
    ) -> Caddyfile {
        let enabled: HashSet<&str> = versions
            .iter()
            .filter(|v| v.is_enabled())
            .map(|v| v.get_version().as_str())
            .collect();

        let mut routed: Vec<&Site> = sites
            .iter()
            .filter(|s| s.is_active() && enabled.contains(s.get_php_version().as_str()))
            .collect();
        routed.sort_by(|a, b| a.get_id().cmp(b.get_id()));

        let mut document = Caddyfile::new()
            .header("Main proxy configuration")
            .header(GENERATED_HEADER)
            .block(self.main_global_block(http_port, https_port));

        for site in routed {
            document = document.block(self.site_block(site));
        }

        let catch_all = Block::site([format!(":{http_port}")])
            .comment("Hosts no site claims")
            .directive(
                Directive::new("header")
                    .arg(Token::bare("Content-Type"))
                    .arg(Token::bare("text/html")),
            )
            .directive(
                Directive::new("respond")
                    .arg(Token::literal(SITE_NOT_CONFIGURED_PAGE))
                    .arg(Token::bare("404")),
            );

        document.block(catch_all)
    }

    /// Renders the routing document of one instance.
    pub fn render_instance_routing(
        &self,
        key: &InstanceKey,
        version: &PhpVersionConfig,
        sites: &[Site],
    ) -> String {
        self.instance_routing(key, version, sites).to_string()
    }

    /// Builds the routing document of one instance.
    ///
    /// Only `sites` owned by the instance's user, on its version and active are routed. With none,
    /// the listener answers 503 to everything so the socket stays present and diagnosable.
    pub fn instance_routing(
        &self,
        key: &InstanceKey,
        version: &PhpVersionConfig,
        sites: &[Site],
    ) -> Caddyfile {
        let mut served: Vec<&Site> = sites
            .iter()
            .filter(|s| {
                s.is_active()
                    && s.get_owner() == &key.username
                    && s.get_php_version() == &key.version
            })
            .collect();
        served.sort_by(|a, b| a.get_id().cmp(b.get_id()));

        let socket = self.layout.socket(&key.username, &key.version);
        let document = Caddyfile::new()
            .header(format!("PHP {} instance for {}", key.version, key.username))
            .header(GENERATED_HEADER)
            .block(self.instance_global_block(key, version));

        let mut listener = Block::site(["http://"]).directive(
            Directive::new("bind").arg(Token::value(format!("unix/{}", socket.display()))),
        );

        if served.is_empty() {
            listener = listener
                .inner_comment(format!("No sites configured for PHP {}", key.version))
                .directive(
                    Directive::new("respond")
                        .arg(Token::quoted("No sites configured"))
                        .arg(Token::bare("503")),
                );
            return document.block(listener);
        }

        for site in served {
            listener = listener.blank();
            listener = self.site_handler(listener, site);
        }

        listener = listener.blank().inner_comment("Default fallback").directive(
            Directive::new("handle").child(
                Directive::new("respond")
                    .arg(Token::quoted("Site not found"))
                    .arg(Token::bare("404")),
            ),
        );

        document.block(listener)
    }

    fn main_global_block(&self, http_port: u16, https_port: u16) -> Block {
        let mut global = Block::global()
            .directive(Directive::new("admin").arg(Token::value(&self.admin_listen)));

        global = if self.dev_mode {
            global.directive(Directive::new("auto_https").arg(Token::bare("off")))
        } else {
            global.directive(Directive::new("email").arg(Token::value(&self.admin_email)))
        };

        let log_path = self.log_dir.join(MAIN_LOG_FILE);
        global
            .directive(Directive::new("http_port").arg(http_port.into()))
            .directive(Directive::new("https_port").arg(https_port.into()))
            .directive(log_directive(
                log_path,
                self.proxy_log_roll_size_mb,
                self.proxy_log_roll_keep,
            ))
    }

    fn site_block(&self, site: &Site) -> Block {
        let socket = self.layout.socket(site.get_owner(), site.get_php_version());
        let addresses = site.hostnames().map(|host| {
            if self.dev_mode {
                format!("http://{host}")
            } else {
                host.to_string()
            }
        });

        let overlay = Directive::new("handle_response")
            .arg(Token::bare("@error"))
            .child(
                Directive::new("header")
                    .arg(Token::bare("Content-Type"))
                    .arg(Token::bare("text/html")),
            )
            .child(
                Directive::new("respond")
                    .arg(Token::literal(PHP_NOT_RESPONDING_PAGE))
                    .arg(Token::bare("{resp.status_code}")),
            );

        Block::site(addresses)
            .comment(format!(
                "Site: {} (PHP {})",
                site.get_name(),
                site.get_php_version()
            ))
            .directive(
                Directive::new("reverse_proxy")
                    .arg(Token::value(format!("unix/{}", socket.display())))
                    .child(Directive::new("@error").args([
                        Token::bare("status"),
                        Token::bare("502"),
                        Token::bare("503"),
                        Token::bare("504"),
                    ]))
                    .child(overlay),
            )
    }

    fn instance_global_block(&self, key: &InstanceKey, version: &PhpVersionConfig) -> Block {
        let admin_socket = self.layout.admin_socket(&key.username, &key.version);
        let access_log = self.layout.access_log(&key.username, &key.version);

        let mut frankenphp = Directive::new("frankenphp")
            .child(Directive::new("num_threads").arg((*version.get_num_threads()).into()));
        let max_threads = *version.get_max_threads();
        if max_threads > 0 {
            frankenphp = frankenphp.child(Directive::new("max_threads").arg(max_threads.into()));
        }

        Block::global()
            .directive(
                Directive::new("admin")
                    .arg(Token::value(format!("unix/{}", admin_socket.display()))),
            )
            .directive(Directive::new("auto_https").arg(Token::bare("off")))
            .directive(log_directive(
                access_log,
                self.instance_log_roll_size_mb,
                self.instance_log_roll_keep,
            ))
            .directive(frankenphp)
    }

    fn site_handler(&self, listener: Block, site: &Site) -> Block {
        let matcher = format!("@{}", matcher_name(site.get_id()));
        let document_root = site.document_root();

        let mut php_server = Directive::new("php_server");
        let mut warning = None;

        match site.worker_path().filter(|_| *site.get_worker_mode()) {
            Some(worker) if worker.is_file() => {
                php_server = php_server.child(
                    Directive::new("worker")
                        .arg(Token::value(worker.display().to_string()))
                        .arg(site.effective_worker_num().into()),
                );
            }
            Some(worker) => {
                tracing::warn!(
                    site = %site.get_id(),
                    worker = %worker.display(),
                    "worker script missing, rendering without worker mode"
                );
                warning = Some(format!(
                    "WARNING: worker script {} not found, serving without worker mode",
                    worker.display()
                ));
            }
            None if *site.get_worker_mode() => {
                warning = Some("WARNING: worker mode requested without a worker file".to_string());
            }
            None => {}
        }

        for (name, value) in site.get_environment() {
            if value.contains(ENV_SUBSTITUTION) {
                php_server = php_server.comment(format!(
                    "WARNING: env {name} skipped, its value contains an environment substitution"
                ));
                continue;
            }

            php_server = php_server.child(
                Directive::new("env")
                    .arg(Token::value(name))
                    .arg(Token::quoted(value)),
            );
        }

        let mut handle = Directive::new("handle")
            .arg(Token::bare(&matcher))
            .child(
                Directive::new("root")
                    .arg(Token::bare("*"))
                    .arg(Token::value(document_root.display().to_string())),
            )
            .child(
                Directive::new("encode")
                    .arg(Token::bare("zstd"))
                    .arg(Token::bare("br"))
                    .arg(Token::bare("gzip")),
            );
        if let Some(warning) = warning {
            handle = handle.comment(warning);
        }
        handle = handle.child(php_server);

        listener
            .inner_comment(format!("Site: {} ({})", site.get_name(), site.get_domain()))
            .directive(
                Directive::new(matcher)
                    .arg(Token::bare("host"))
                    .args(site.hostnames().map(Token::value)),
            )
            .directive(handle)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn log_directive(path: PathBuf, roll_size_mb: u64, roll_keep: u32) -> Directive {
    Directive::new("log")
        .child(
            Directive::new("output")
                .arg(Token::bare("file"))
                .arg(Token::value(path.display().to_string()))
                .child(Directive::new("roll_size").arg(Token::bare(format!("{roll_size_mb}mb"))))
                .child(Directive::new("roll_keep").arg(roll_keep.into())),
        )
        .child(Directive::new("format").arg(Token::bare("json")))
}

/// A named matcher derived from a site id.
///
/// ASCII letters and digits are kept. Every other byte becomes `_` followed by its two hex
/// digits, so distinct ids always yield distinct names.
fn matcher_name(site_id: &str) -> String {
    let mut name = String::from("site_");
    for byte in site_id.bytes() {
        if byte.is_ascii_alphanumeric() {
            name.push(byte as char);
        } else {
            let _ = write!(name, "_{byte:02X}");
        }
    }
    name
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
