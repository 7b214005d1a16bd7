//! Salon record types and the collections they live in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Record;

/// A service on the menu (cut, colouring, manicure...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Servico {
  pub id: String,
  pub nome: String,
  pub valor: f64,
  /// Duration in minutes
  #[serde(default)]
  pub duracao: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub descricao: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cliente {
  pub id: String,
  pub nome: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub telefone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_nascimento: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub observacoes: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendamentoStatus {
  #[default]
  Agendado,
  Confirmado,
  Concluido,
  Cancelado,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agendamento {
  pub id: String,
  pub cliente_id: String,
  pub servico_id: String,
  /// Date as YYYY-MM-DD
  pub data: String,
  /// Time as HH:MM
  pub hora: String,
  #[serde(default)]
  pub status: AgendamentoStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub valor: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub observacoes: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A recurring appointment schedule for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cronograma {
  pub id_cronograma: i64,
  pub cliente_id: String,
  pub servico_id: String,
  /// Days between sessions
  pub intervalo_dias: u32,
  pub data_inicio: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_fim: Option<String>,
  #[serde(default = "default_true")]
  pub ativo: bool,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoLancamento {
  Entrada,
  Saida,
}

/// A ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lancamento {
  pub id: String,
  pub tipo: TipoLancamento,
  pub descricao: String,
  pub valor: f64,
  pub data: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub categoria: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agendamento_id: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
  pub id: String,
  #[serde(default)]
  pub lembretes_ativos: bool,
  /// Hours before an appointment to remind the client
  #[serde(default)]
  pub antecedencia_horas: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mensagem_padrao: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuracoes {
  pub id: String,
  pub nome_salao: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub telefone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub endereco: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usuario {
  pub id: String,
  pub nome: String,
  pub email: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

// ============================================================================
// Record implementations
// ============================================================================

impl Record for Servico {
  const COLLECTION: &'static str = "servicos";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for Cliente {
  const COLLECTION: &'static str = "clientes";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for Agendamento {
  const COLLECTION: &'static str = "agendamentos";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for Cronograma {
  const COLLECTION: &'static str = "cronogramas";
  const IDENTITY_FIELD: &'static str = "id_cronograma";

  fn identity(&self) -> String {
    self.id_cronograma.to_string()
  }
}

impl Record for Lancamento {
  const COLLECTION: &'static str = "lancamentos";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for NotificationSettings {
  const COLLECTION: &'static str = "notification-settings";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for Configuracoes {
  const COLLECTION: &'static str = "configuracoes";

  fn identity(&self) -> String {
    self.id.clone()
  }
}

impl Record for Usuario {
  const COLLECTION: &'static str = "usuario";

  fn identity(&self) -> String {
    self.id.clone()
  }
}
