// Handler execution chain: a handler method plus its interceptors

use crate::handler_method::HandlerMethod;
use crate::http::{HttpRequest, HttpResponse, ModelAndView};
use crate::interceptor::HandlerInterceptor;
use crate::logging::{debug, error, trace};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// How a chain run through [`HandlerExecutionChain::execute`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// An interceptor's `pre_handle` returned `false`; the handler did not run.
    ShortCircuited,
    Completed(Option<ModelAndView>),
}

/// A handler method and the interceptors applied around it.
///
/// Created per request. The chain remembers the last interceptor whose
/// `pre_handle` returned `true`; only interceptors up to that one get
/// `after_completion`.
pub struct HandlerExecutionChain {
    handler: HandlerMethod,
    interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    interceptor_index: Option<usize>,
}

impl HandlerExecutionChain {
    pub fn new(handler: HandlerMethod) -> Self {
        Self::with_interceptors(handler, Vec::new())
    }

    pub fn with_interceptors(
        handler: HandlerMethod,
        interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    ) -> Self {
        Self {
            handler,
            interceptors,
            interceptor_index: None,
        }
    }

    pub fn handler(&self) -> &HandlerMethod {
        &self.handler
    }

    pub fn interceptors(&self) -> &[Arc<dyn HandlerInterceptor>] {
        &self.interceptors
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn HandlerInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Insert at `index`, shifting later interceptors back. An index past
    /// the end appends.
    pub fn add_interceptor_at(&mut self, index: usize, interceptor: Arc<dyn HandlerInterceptor>) {
        let index = index.min(self.interceptors.len());
        self.interceptors.insert(index, interceptor);
    }

    pub fn add_interceptors<I>(&mut self, interceptors: I)
    where
        I: IntoIterator<Item = Arc<dyn HandlerInterceptor>>,
    {
        self.interceptors.extend(interceptors);
    }

    /// Index of the last interceptor whose `pre_handle` returned `true`.
    pub fn interceptor_index(&self) -> Option<usize> {
        self.interceptor_index
    }

    /// Run `pre_handle` in order.
    ///
    /// When an interceptor returns `false`, `after_completion` is triggered
    /// for the interceptors before it and `false` is returned; the caller
    /// must not invoke the handler. An error is returned as is, leaving
    /// cleanup to the caller.
    pub fn apply_pre_handle(
        &mut self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
    ) -> Result<bool> {
        for i in 0..self.interceptors.len() {
            let interceptor = Arc::clone(&self.interceptors[i]);
            if !interceptor.pre_handle(request, response, &self.handler)? {
                debug!(interceptor = interceptor.name(), "Interceptor stopped the chain");
                self.trigger_after_completion(request, response, None);
                return Ok(false);
            }
            self.interceptor_index = Some(i);
        }
        Ok(true)
    }

    /// Run `post_handle` in reverse order. The first error is returned.
    pub fn apply_post_handle(
        &self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        mut model_and_view: Option<&mut ModelAndView>,
    ) -> Result<()> {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.post_handle(
                request,
                response,
                &self.handler,
                model_and_view.as_deref_mut(),
            )?;
        }
        Ok(())
    }

    /// Run `after_completion` in reverse order for every interceptor whose
    /// `pre_handle` returned `true`.
    ///
    /// Failures are logged; every interceptor still gets its call.
    pub fn trigger_after_completion(
        &self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        failure: Option<&Error>,
    ) {
        let Some(last) = self.interceptor_index else {
            return;
        };
        for interceptor in self.interceptors[..=last].iter().rev() {
            if let Err(e) = interceptor.after_completion(request, response, &self.handler, failure) {
                error!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "HandlerInterceptor::after_completion failed"
                );
            }
        }
    }

    /// Notify async-capable interceptors, in reverse order, that handling
    /// continues on another thread. Failures are logged.
    pub fn apply_after_concurrent_handling_started(
        &self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
    ) {
        for interceptor in self.interceptors.iter().rev() {
            if let Some(async_interceptor) = interceptor.as_async() {
                if let Err(e) =
                    async_interceptor.after_concurrent_handling_started(request, response, &self.handler)
                {
                    error!(
                        interceptor = interceptor.name(),
                        error = %e,
                        "Interceptor failed after concurrent handling started"
                    );
                }
            }
        }
    }

    /// Run the whole protocol around `invoke`: pre phase, handler, post
    /// phase, then after-completion with the terminal error if any.
    pub fn execute<F>(
        &mut self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        invoke: F,
    ) -> Result<ChainOutcome>
    where
        F: FnOnce(&mut HttpRequest, &mut HttpResponse, &HandlerMethod) -> Result<Option<ModelAndView>>,
    {
        trace!(handler = %self.handler, interceptor_count = self.interceptors.len(), "Executing handler chain");
        match self.run(request, response, invoke) {
            Ok(ChainOutcome::ShortCircuited) => Ok(ChainOutcome::ShortCircuited),
            Ok(outcome) => {
                self.trigger_after_completion(request, response, None);
                Ok(outcome)
            }
            Err(e) => {
                self.trigger_after_completion(request, response, Some(&e));
                Err(e)
            }
        }
    }

    fn run<F>(
        &mut self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        invoke: F,
    ) -> Result<ChainOutcome>
    where
        F: FnOnce(&mut HttpRequest, &mut HttpResponse, &HandlerMethod) -> Result<Option<ModelAndView>>,
    {
        if !self.apply_pre_handle(request, response)? {
            return Ok(ChainOutcome::ShortCircuited);
        }
        let mut model_and_view = invoke(request, response, &self.handler)?;
        self.apply_post_handle(request, response, model_and_view.as_mut())?;
        Ok(ChainOutcome::Completed(model_and_view))
    }
}

impl fmt::Debug for HandlerExecutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("HandlerExecutionChain")
            .field("handler", &self.handler)
            .field("interceptors", &names)
            .field("interceptor_index", &self.interceptor_index)
            .finish()
    }
}

impl fmt::Display for HandlerExecutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HandlerExecutionChain with [{}] and {} interceptors",
            self.handler,
            self.interceptors.len()
        )
    }
}
