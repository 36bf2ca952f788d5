//! Sinal de encerramento entre threads.
//!
//! Nada trafega pelo canal: o sinal é a desconexão. Disparar qualquer clone do
//! [`ShutdownHandle`] (ou soltar o último) desconecta todos os [`Shutdown`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Lado que dispara o encerramento. Clones compartilham o mesmo sinal, para
/// que o handler de Ctrl+C e a thread HTTP possam disparar.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl ShutdownHandle {
    /// Dispara o encerramento. Chamadas repetidas não têm efeito.
    pub fn trigger(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Lado observado pelas threads de trabalho.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Receiver<()>,
}

/// Cria um par handle/sinal.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = bounded(0);
    let handle = ShutdownHandle {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    (handle, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Dorme até `timeout` ou até o encerramento. Retorna `true` se encerrou.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
