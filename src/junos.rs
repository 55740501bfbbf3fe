//! Fixed Junos command batches sent during bootstrap and reset.

/// Factory configuration mounted into the cPTX pod
pub const FACTORY_CONFIG_PATH: &str = "/var/vmguest/config/juniper.conf";

/// Certificate identifier the gRPC server is configured with
pub const GRPC_CERT_ID: &str = "grpc-server-cert";

pub const GRPC_PORT: u16 = 32767;

/// Key pair + self-signed certificate generation for `cert_id`
pub fn cert_commands(cert_id: &str) -> Vec<String> {
    vec![
        format!("request security pki generate-key-pair certificate-id {}", cert_id),
        format!(
            "request security pki local-certificate generate-self-signed certificate-id {} \
             subject CN=abc domain-name google.com ip-address 1.2.3.4 email example@google.com",
            cert_id
        ),
    ]
}

/// Statements enabling the gNMI server over TLS. Ends with `commit`.
pub fn grpc_config() -> Vec<String> {
    const SERVER: &str = "set openconfig-system:system openconfig-system-grpc:grpc-servers grpc-server grpc-server config";
    vec![
        "set system services extension-service request-response grpc ssl hot-reloading".to_string(),
        "set system services extension-service request-response grpc ssl use-pki".to_string(),
        format!("{} services GNMI", SERVER),
        format!("{} enable true", SERVER),
        format!("{} port {}", SERVER, GRPC_PORT),
        format!("{} transport-security true", SERVER),
        format!("{} certificate-id {}", SERVER, GRPC_CERT_ID),
        format!("{} listen-addresses 0.0.0.0", SERVER),
        "commit".to_string(),
    ]
}

/// Replace the running config with the factory file and commit it
pub fn factory_reset_config() -> Vec<String> {
    vec![
        format!("load override {}", FACTORY_CONFIG_PATH),
        "commit".to_string(),
    ]
}
