// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EVENT BUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Canal de eventos nomeados compartilhado por crew, fila e watcher.
// Consumidores não exercem back-pressure: broadcast com buffer fixo,
// receivers lentos perdem eventos (lagged) em vez de bloquear o produtor.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::PivotUrgency;

/// Capacidade do buffer de broadcast
const EVENT_BUFFER: usize = 256;

/// Evento nomeado emitido pelos componentes do serviço
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// O watcher aceitou um gatilho autônomo
    ResearchTriggered {
        /// Sessão de origem
        session_id: String,
        /// Query que será pesquisada
        query: String,
    },
    /// Início de uma iteração do crew
    IterationStart {
        /// Número da iteração (1-based)
        iteration: u32,
    },
    /// Fim de uma iteração do crew
    IterationComplete {
        /// Número da iteração (1-based)
        iteration: u32,
    },
    /// Um specialist foi despachado
    SpecialistDispatch {
        /// Nome do specialist
        specialist: String,
        /// Query do passo
        query: String,
    },
    /// Um specialist retornou seu fragment
    SpecialistComplete {
        /// Nome do specialist
        specialist: String,
        /// Quantidade de resultados coletados
        results: usize,
    },
    /// O evaluator sugeriu uma abordagem alternativa
    PivotDetected {
        /// Alternativa proposta
        alternative: String,
        /// Urgência
        urgency: PivotUrgency,
    },
    /// Pesquisa concluída e persistida
    ResearchComplete {
        /// Query original
        query: String,
        /// Confiança final
        confidence: f32,
    },
    /// Task aceita na fila
    TaskQueued {
        /// Id da task
        id: Uuid,
    },
    /// Task passou para `running`
    TaskStarted {
        /// Id da task
        id: Uuid,
    },
    /// Task concluída
    TaskCompleted {
        /// Id da task
        id: Uuid,
    },
    /// Task falhou (tentativas esgotadas)
    TaskFailed {
        /// Id da task
        id: Uuid,
        /// Último erro
        error: String,
    },
    /// A fila esvaziou
    QueueDrained,
}

impl ServiceEvent {
    /// Nome canônico do evento (útil para logs e filtros)
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResearchTriggered { .. } => "research:triggered",
            Self::IterationStart { .. } => "iteration:start",
            Self::IterationComplete { .. } => "iteration:complete",
            Self::SpecialistDispatch { .. } => "specialist:dispatch",
            Self::SpecialistComplete { .. } => "specialist:complete",
            Self::PivotDetected { .. } => "pivot:detected",
            Self::ResearchComplete { .. } => "research:complete",
            Self::TaskQueued { .. } => "taskQueued",
            Self::TaskStarted { .. } => "taskStarted",
            Self::TaskCompleted { .. } => "taskCompleted",
            Self::TaskFailed { .. } => "taskFailed",
            Self::QueueDrained => "queueDrained",
        }
    }
}

/// Bus de eventos do serviço
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Cria um bus com buffer padrão
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Assina o bus (cada receiver vê todos os eventos a partir da assinatura)
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    /// Emite um evento. Sem receivers ativos o evento é descartado
    /// silenciosamente (emissão nunca falha nem bloqueia).
    pub fn emit(&self, event: ServiceEvent) {
        log::debug!("event {}", event.name());
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ServiceEvent::QueueDrained);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "queueDrained");
    }

    #[test]
    fn test_emit_without_receivers_is_ok() {
        let bus = EventBus::new();
        bus.emit(ServiceEvent::IterationStart { iteration: 1 });
    }

    #[test]
    fn test_event_names() {
        let event = ServiceEvent::ResearchTriggered {
            session_id: "s".into(),
            query: "q".into(),
        };
        assert_eq!(event.name(), "research:triggered");
    }
}
