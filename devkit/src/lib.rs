/*!
# Procdeck DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant les tests du moteur procdeck avec:
- Stubs des collaborateurs (annuaire, télémétrie, actions) sans backend ni broker
- Fixtures pour processus, serveurs et échantillons de métriques
- Harness de session (sélection + ACL + agrégation)
*/

pub mod action_stub;
pub mod directory_stub;
pub mod fixtures;
pub mod telemetry_stub;
pub mod test_utils;

pub use action_stub::{RecordingActionClient, ScriptedReply};
pub use directory_stub::StaticDirectory;
pub use fixtures::{log_entry, process, sample, server, ProcessBuilder, EPOCH};
pub use telemetry_stub::{StubTelemetry, TelemetryCall};
pub use test_utils::{init_logging, TestHarness};
