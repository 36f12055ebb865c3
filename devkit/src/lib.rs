/*!
# Classwatch DevKit - Stubs et utilitaires pour le développement

Bibliothèque facilitant les tests du bridge Classwatch avec:
- Stub MQTT implémentant le transport du kernel, sans broker
- Constructeurs de messages au format des appareils
- Harness branchant un bridge complet
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{DeviceMessageBuilder, MockMqttClient};
pub use test_utils::{RecordingNotifier, TestHarness};
